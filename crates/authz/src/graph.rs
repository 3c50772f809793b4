//! Pure, in-memory resolution algorithms (spec §4.4 "Resolution Engine",
//! Design Notes §9). Everything here operates on an already-fetched
//! snapshot of tuples and hierarchy rules for a namespace — no I/O, no
//! async — so the hard part of this crate (cycle-safe transitive
//! resolution) is unit-testable without a database.

use std::collections::{HashMap, HashSet, VecDeque};

use authgraph_models::{EntityRef, HierarchyRule, RelationTuple, SubjectKey};

/// An in-memory view of everything resolution needs for one namespace:
/// its unexpired tuples and its effective hierarchy rules (own +
/// global, spec §4.3).
#[derive(Debug, Clone)]
pub struct Snapshot {
    tuples: Vec<RelationTuple>,
    rules: Vec<HierarchyRule>,
    membership_relations: HashSet<String>,
}

impl Snapshot {
    pub fn new(tuples: Vec<RelationTuple>, rules: Vec<HierarchyRule>) -> Self {
        Self::with_membership_relations(tuples, rules, crate::config::EngineConfig::default().group_membership_relations)
    }

    /// Like [`Snapshot::new`] but with an explicit membership-relation set
    /// (spec §4.4.1: "transitive group membership" only chains through
    /// tuples whose relation is a recognized membership relation of that
    /// type — everything else is a one-shot userset rewrite).
    pub fn with_membership_relations(tuples: Vec<RelationTuple>, rules: Vec<HierarchyRule>, membership_relations: HashSet<String>) -> Self {
        Self {
            tuples,
            rules,
            membership_relations,
        }
    }

    pub fn tuples(&self) -> &[RelationTuple] {
        &self.tuples
    }

    fn tuples_for_resource<'a>(&'a self, resource: &'a EntityRef) -> impl Iterator<Item = &'a RelationTuple> {
        self.tuples
            .iter()
            .filter(move |t| t.resource_type == resource.entity_type && t.resource_id == resource.entity_id)
    }

    /// Every relation `r` such that holding `r` on a `resource_type`
    /// transitively implies `permission` (including `permission` itself),
    /// found via reverse BFS over `(permission, implies)` edges.
    pub fn implied_by(&self, resource_type: &str, permission: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();
        result.insert(permission.to_string());
        queue.push_back(permission.to_string());

        while let Some(current) = queue.pop_front() {
            for rule in &self.rules {
                if rule.resource_type == resource_type && rule.implies == current && result.insert(rule.permission.clone()) {
                    queue.push_back(rule.permission.clone());
                }
            }
        }
        result
    }

    /// Does `subject` hold `permission` on `resource`, directly, via
    /// hierarchy, or transitively through a group/userset rewrite?
    /// (spec §4.4 "check"). Cycle-safe: a `(subject, permission, resource)`
    /// triple is only ever explored once per call.
    pub fn check(&self, subject: &EntityRef, permission: &str, resource: &EntityRef) -> bool {
        let mut visited = HashSet::new();
        self.check_visited(subject, permission, resource, &mut visited)
    }

    fn check_visited(
        &self,
        subject: &EntityRef,
        permission: &str,
        resource: &EntityRef,
        visited: &mut HashSet<(EntityRef, String, EntityRef)>,
    ) -> bool {
        let key = (subject.clone(), permission.to_string(), resource.clone());
        if !visited.insert(key) {
            return false;
        }

        let implied = self.implied_by(&resource.entity_type, permission);
        for tuple in self.tuples_for_resource(resource) {
            if !implied.contains(&tuple.relation) {
                continue;
            }
            match tuple.subject_key() {
                SubjectKey::Default(entity) if &entity == subject => return true,
                SubjectKey::Default(_) => {}
                SubjectKey::Qualified(group, group_relation) => {
                    let same_type_chain = group.entity_type == resource.entity_type;
                    if same_type_chain && !self.membership_relations.contains(&group_relation) {
                        continue;
                    }
                    if self.check_visited(subject, &group_relation, &group, visited) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Human-readable derivation for why `subject` does or does not hold
    /// `permission` on `resource` (spec §4.4.3 "explain"). One entry per
    /// distinct satisfying path; the single-element sentinel `["NO ACCESS"]`
    /// when no path exists.
    pub fn explain(&self, subject: &EntityRef, permission: &str, resource: &EntityRef) -> Vec<String> {
        let mut visited = HashSet::new();
        let paths = self.explain_visited(subject, permission, resource, &mut visited);
        if paths.is_empty() {
            vec!["NO ACCESS".to_string()]
        } else {
            paths
        }
    }

    fn explain_visited(
        &self,
        subject: &EntityRef,
        permission: &str,
        resource: &EntityRef,
        visited: &mut HashSet<(EntityRef, String, EntityRef)>,
    ) -> Vec<String> {
        let key = (subject.clone(), permission.to_string(), resource.clone());
        if !visited.insert(key) {
            return Vec::new();
        }

        let mut paths = Vec::new();

        for tuple in self.tuples_for_resource(resource) {
            if tuple.relation != permission {
                continue;
            }
            if let SubjectKey::Default(entity) = tuple.subject_key() {
                if &entity == subject {
                    paths.push(format!("DIRECT: {subject} has {permission} on {resource}"));
                }
            }
        }

        let implied = self.implied_by(&resource.entity_type, permission);
        for tuple in self.tuples_for_resource(resource) {
            if tuple.relation == permission || !implied.contains(&tuple.relation) {
                continue;
            }
            if let SubjectKey::Default(entity) = tuple.subject_key() {
                if &entity == subject {
                    paths.push(format!(
                        "HIERARCHY: {subject} has {} on {resource} ({} -> {permission})",
                        tuple.relation, tuple.relation
                    ));
                }
            }
        }

        for tuple in self.tuples_for_resource(resource) {
            if !implied.contains(&tuple.relation) {
                continue;
            }
            if let SubjectKey::Qualified(group, group_relation) = tuple.subject_key() {
                let same_type_chain = group.entity_type == resource.entity_type;
                if same_type_chain && !self.membership_relations.contains(&group_relation) {
                    continue;
                }
                for nested in self.explain_visited(subject, &group_relation, &group, visited) {
                    paths.push(format!(
                        "{nested} <- GROUP: {group} subjects with {group_relation} get {} on {resource}",
                        tuple.relation
                    ));
                }
            }
        }

        paths
    }

    /// All subjects directly or transitively authorized for `permission`
    /// on `resource` (spec §4.4 "list_subjects"). Enumerated by checking
    /// every distinct subject mentioned anywhere in the namespace against
    /// `check` — correct for any namespace small enough to fit in a
    /// snapshot, which is the whole point of evaluation-on-read.
    pub fn list_subjects(&self, permission: &str, resource: &EntityRef) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tuple in &self.tuples {
            let candidate = EntityRef {
                entity_type: tuple.subject_type.clone(),
                entity_id: tuple.subject_id.clone(),
            };
            if tuple.subject_relation.is_some() || !seen.insert(candidate.clone()) {
                continue;
            }
            if self.check(&candidate, permission, resource) {
                out.push(candidate);
            }
        }
        out
    }

    /// All resources of `resource_type` on which `subject` holds
    /// `permission` (spec §4.4 "list_resources").
    pub fn list_resources(&self, subject: &EntityRef, resource_type: &str, permission: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tuple in &self.tuples {
            if tuple.resource_type != resource_type || !seen.insert(tuple.resource_id.clone()) {
                continue;
            }
            let resource = EntityRef {
                entity_type: tuple.resource_type.clone(),
                entity_id: tuple.resource_id.clone(),
            };
            if self.check(subject, permission, &resource) {
                out.push(tuple.resource_id.clone());
            }
        }
        out
    }
}

/// A group-membership edge: holding `relation` on `(entity_type, entity_id)`
/// via a `SubjectKey::Qualified` userset rewrite.
type MembershipNode = (String, String, String);

/// Build the group-membership edge graph (spec §4.4.1, invariant I3): an
/// edge `(group, group_relation) -> (resource, relation)` exists only for
/// tuples that are genuinely "group is a member of group" edges — same
/// entity type on both sides, and `relation`/`group_relation` both drawn
/// from the configured membership relations. A tuple granting `doc:1#viewer`
/// to `team:eng#member` is a one-shot userset rewrite, not a membership
/// edge, and never participates in this graph.
fn build_membership_edges(tuples: &[RelationTuple], membership_relations: &HashSet<String>) -> HashMap<MembershipNode, Vec<MembershipNode>> {
    let mut edges: HashMap<MembershipNode, Vec<MembershipNode>> = HashMap::new();
    for t in tuples {
        if let SubjectKey::Qualified(group, group_relation) = t.subject_key() {
            if group.entity_type != t.resource_type {
                continue;
            }
            if !membership_relations.contains(&t.relation) || !membership_relations.contains(&group_relation) {
                continue;
            }
            let from = (group.entity_type.clone(), group.entity_id.clone(), group_relation);
            let to = (t.resource_type.clone(), t.resource_id.clone(), t.relation.clone());
            edges.entry(from).or_default().push(to);
        }
    }
    edges
}

/// Group-membership cycles (team A contains team B contains team A) are
/// rejected at write time (invariant I3, enforced by
/// [`would_create_membership_cycle`] inside `grant`/`bulk_grant`). This scans
/// the full edge graph after the fact for `verify()`'s operational report —
/// useful if membership relations were reconfigured, or for data imported
/// outside the normal write path. Returns one chain per distinct cycle
/// found, each a sequence of `(resource_type, resource_id, relation)` nodes
/// ending back where it started.
pub fn find_membership_cycles(tuples: &[RelationTuple], membership_relations: &HashSet<String>) -> Vec<Vec<MembershipNode>> {
    let edges = build_membership_edges(tuples, membership_relations);

    let mut cycles = Vec::new();
    let mut done: HashSet<MembershipNode> = HashSet::new();
    let nodes: Vec<MembershipNode> = edges.keys().cloned().collect();

    for start in nodes {
        if done.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        visit_membership(&edges, &mut done, &mut path, &start, &mut cycles);
    }
    cycles
}

fn visit_membership(
    edges: &HashMap<MembershipNode, Vec<MembershipNode>>,
    done: &mut HashSet<MembershipNode>,
    path: &mut Vec<MembershipNode>,
    node: &MembershipNode,
    cycles: &mut Vec<Vec<MembershipNode>>,
) {
    if let Some(pos) = path.iter().position(|n| n == node) {
        cycles.push(path[pos..].to_vec());
        return;
    }
    if done.contains(node) {
        return;
    }
    path.push(node.clone());
    if let Some(next) = edges.get(node) {
        for n in next.clone() {
            visit_membership(edges, done, path, &n, cycles);
        }
    }
    path.pop();
    done.insert(node.clone());
}

/// Would granting `relation` on `resource` to `subject` create a direct
/// self-membership (spec §4.2 enforcement step 2) or close a cycle in the
/// group-membership graph (step 3, invariant I3)? Checked against
/// `existing` — the namespace's current tuple set — before the new tuple is
/// persisted. Mirrors the shape of [`would_create_cycle`]: a self-loop
/// check, then a reachability search in the existing graph from the
/// proposed edge's destination back to its source.
pub fn would_create_membership_cycle(existing: &[RelationTuple], resource: &EntityRef, relation: &str, subject: &SubjectKey, membership_relations: &HashSet<String>) -> bool {
    match subject {
        SubjectKey::Default(entity) => {
            membership_relations.contains(relation) && entity.entity_type == resource.entity_type && entity.entity_id == resource.entity_id
        }
        SubjectKey::Qualified(group, group_relation) => {
            if group.entity_type != resource.entity_type {
                return false;
            }
            if !membership_relations.contains(relation) || !membership_relations.contains(group_relation) {
                return false;
            }

            let source = (group.entity_type.clone(), group.entity_id.clone(), group_relation.clone());
            let dest = (resource.entity_type.clone(), resource.entity_id.clone(), relation.to_string());
            if source == dest {
                return true;
            }

            let edges = build_membership_edges(existing, membership_relations);
            let mut visited = HashSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(dest.clone());
            visited.insert(dest);

            while let Some(node) = queue.pop_front() {
                if node == source {
                    return true;
                }
                if let Some(next) = edges.get(&node) {
                    for n in next {
                        if visited.insert(n.clone()) {
                            queue.push_back(n.clone());
                        }
                    }
                }
            }
            false
        }
    }
}

/// Would adding `namespace.resource_type.permission -> implies` create a
/// cycle in the permission-implication DAG? Checked against the rule set
/// effective for the namespace the new rule lands in (its own rules plus
/// global), since hierarchy resolution consults both together.
pub fn would_create_cycle(effective_rules: &[HierarchyRule], resource_type: &str, permission: &str, implies: &str) -> bool {
    if permission == implies {
        return true;
    }
    // A cycle forms iff `implies` can already (transitively) reach `permission`.
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(implies.to_string());
    visited.insert(implies.to_string());

    while let Some(current) = queue.pop_front() {
        if current == permission {
            return true;
        }
        for rule in effective_rules {
            if rule.resource_type == resource_type && rule.permission == current && visited.insert(rule.implies.clone()) {
                queue.push_back(rule.implies.clone());
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use authgraph_models::Namespace;
    use chrono::Utc;
    use uuid::Uuid;

    fn tuple(resource_type: &str, resource_id: &str, relation: &str, subject: SubjectKey) -> RelationTuple {
        let (subject_type, subject_id, subject_relation) = match &subject {
            SubjectKey::Default(e) => (e.entity_type.clone(), e.entity_id.clone(), None),
            SubjectKey::Qualified(e, rel) => (e.entity_type.clone(), e.entity_id.clone(), Some(rel.clone())),
        };
        RelationTuple {
            id: Uuid::new_v4(),
            namespace: Namespace::new("acme-corp").unwrap(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            relation: relation.to_string(),
            subject_type,
            subject_id,
            subject_relation,
            created_at: Utc::now(),
            created_by: None,
            expires_at: None,
        }
    }

    fn rule(resource_type: &str, permission: &str, implies: &str) -> HierarchyRule {
        HierarchyRule::new(Namespace::new("acme-corp").unwrap(), resource_type, permission, implies)
    }

    fn entity(entity_type: &str, entity_id: &str) -> EntityRef {
        EntityRef::new(entity_type, entity_id).unwrap()
    }

    #[test]
    fn direct_grant_is_visible() {
        let alice = entity("user", "alice");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(vec![tuple("doc", "1", "viewer", SubjectKey::Default(alice.clone()))], vec![]);
        assert!(snapshot.check(&alice, "viewer", &doc));
    }

    #[test]
    fn hierarchy_implication_chains() {
        let alice = entity("user", "alice");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(
            vec![tuple("doc", "1", "admin", SubjectKey::Default(alice.clone()))],
            vec![rule("doc", "admin", "write"), rule("doc", "write", "viewer")],
        );
        assert!(snapshot.check(&alice, "viewer", &doc));
        assert!(snapshot.check(&alice, "write", &doc));
        assert!(snapshot.check(&alice, "admin", &doc));
    }

    #[test]
    fn transitive_group_membership_grants_access() {
        let alice = entity("user", "alice");
        let eng = entity("team", "eng");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(
            vec![
                tuple("doc", "1", "viewer", SubjectKey::Qualified(eng.clone(), "member".to_string())),
                tuple("team", "eng", "member", SubjectKey::Default(alice.clone())),
            ],
            vec![],
        );
        assert!(snapshot.check(&alice, "viewer", &doc));
    }

    #[test]
    fn nested_team_membership_is_transitive() {
        let alice = entity("user", "alice");
        let eng = entity("team", "eng");
        let platform = entity("team", "platform");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(
            vec![
                tuple("doc", "1", "viewer", SubjectKey::Qualified(eng.clone(), "member".to_string())),
                tuple("team", "eng", "member", SubjectKey::Qualified(platform.clone(), "member".to_string())),
                tuple("team", "platform", "member", SubjectKey::Default(alice.clone())),
            ],
            vec![],
        );
        assert!(snapshot.check(&alice, "viewer", &doc));
    }

    #[test]
    fn subject_relation_qualifier_is_discriminating() {
        let alice = entity("user", "alice");
        let security = entity("team", "security");
        let doc = entity("doc", "1");
        // doc:1#admin is granted to team:security#admin, not #member.
        let snapshot = Snapshot::new(
            vec![
                tuple("doc", "1", "admin", SubjectKey::Qualified(security.clone(), "admin".to_string())),
                tuple("team", "security", "member", SubjectKey::Default(alice.clone())),
            ],
            vec![],
        );
        assert!(!snapshot.check(&alice, "admin", &doc));
    }

    #[test]
    fn membership_cycle_does_not_infinite_loop() {
        let a = entity("team", "a");
        let b = entity("team", "b");
        let alice = entity("user", "alice");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(
            vec![
                tuple("team", "a", "member", SubjectKey::Qualified(b.clone(), "member".to_string())),
                tuple("team", "b", "member", SubjectKey::Qualified(a.clone(), "member".to_string())),
                tuple("doc", "1", "viewer", SubjectKey::Qualified(a.clone(), "member".to_string())),
            ],
            vec![],
        );
        assert!(!snapshot.check(&alice, "viewer", &doc));
    }

    #[test]
    fn explain_reports_hierarchy_reasoning() {
        let alice = entity("user", "alice");
        let doc = entity("doc", "1");
        let snapshot = Snapshot::new(
            vec![tuple("doc", "1", "admin", SubjectKey::Default(alice.clone()))],
            vec![rule("doc", "admin", "write")],
        );
        let chain = snapshot.explain(&alice, "write", &doc);
        assert_eq!(chain.len(), 1);
        assert!(chain[0].starts_with("HIERARCHY:"));
    }

    #[test]
    fn adding_a_rule_that_closes_a_loop_is_rejected() {
        let rules = vec![rule("doc", "admin", "write"), rule("doc", "write", "viewer")];
        assert!(would_create_cycle(&rules, "doc", "viewer", "admin"));
        assert!(!would_create_cycle(&rules, "doc", "admin", "owner"));
    }

    #[test]
    fn self_implication_is_a_cycle() {
        assert!(would_create_cycle(&[], "doc", "admin", "admin"));
    }

    #[test]
    fn membership_cycle_is_reported_by_verify() {
        let a = entity("team", "a");
        let b = entity("team", "b");
        let tuples = vec![
            tuple("team", "a", "member", SubjectKey::Qualified(b.clone(), "member".to_string())),
            tuple("team", "b", "member", SubjectKey::Qualified(a.clone(), "member".to_string())),
        ];
        let relations = EngineConfig::default().group_membership_relations;
        let cycles = find_membership_cycles(&tuples, &relations);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }

    #[test]
    fn acyclic_membership_reports_nothing() {
        let eng = entity("team", "eng");
        let alice = entity("user", "alice");
        let tuples = vec![
            tuple("doc", "1", "viewer", SubjectKey::Qualified(eng.clone(), "member".to_string())),
            tuple("team", "eng", "member", SubjectKey::Default(alice)),
        ];
        let relations = EngineConfig::default().group_membership_relations;
        assert!(find_membership_cycles(&tuples, &relations).is_empty());
    }

    #[test]
    fn direct_self_membership_is_rejected() {
        let a = entity("team", "a");
        let relations = EngineConfig::default().group_membership_relations;
        assert!(would_create_membership_cycle(&[], &a, "member", &SubjectKey::Default(a.clone()), &relations));
    }

    #[test]
    fn direct_group_cycle_is_rejected() {
        let a = entity("team", "a");
        let b = entity("team", "b");
        let relations = EngineConfig::default().group_membership_relations;
        // a#member already includes b#member; granting b#member <- a#member would close the loop.
        let existing = vec![tuple("team", "a", "member", SubjectKey::Qualified(b.clone(), "member".to_string()))];
        assert!(would_create_membership_cycle(
            &existing,
            &b,
            "member",
            &SubjectKey::Qualified(a.clone(), "member".to_string()),
            &relations
        ));
    }

    #[test]
    fn indirect_group_cycle_is_rejected() {
        let a = entity("team", "a");
        let b = entity("team", "b");
        let c = entity("team", "c");
        let relations = EngineConfig::default().group_membership_relations;
        let existing = vec![
            tuple("team", "a", "member", SubjectKey::Qualified(b.clone(), "member".to_string())),
            tuple("team", "b", "member", SubjectKey::Qualified(c.clone(), "member".to_string())),
        ];
        assert!(would_create_membership_cycle(
            &existing,
            &c,
            "member",
            &SubjectKey::Qualified(a.clone(), "member".to_string()),
            &relations
        ));
    }

    #[test]
    fn valid_dag_membership_is_allowed() {
        let a = entity("team", "a");
        let b = entity("team", "b");
        let c = entity("team", "c");
        let relations = EngineConfig::default().group_membership_relations;
        // diamond: c contains both a and b, neither a nor b contains the other.
        let existing = vec![tuple("team", "c", "member", SubjectKey::Qualified(a.clone(), "member".to_string()))];
        assert!(!would_create_membership_cycle(
            &existing,
            &c,
            "member",
            &SubjectKey::Qualified(b.clone(), "member".to_string()),
            &relations
        ));
    }

    #[test]
    fn non_membership_relation_is_never_a_cycle() {
        let security = entity("team", "security");
        let relations = EngineConfig::default().group_membership_relations;
        // "owns" is not a recognized membership relation, so even a same-type
        // self-loop through it is just an ordinary (if odd) userset rewrite.
        assert!(!would_create_membership_cycle(
            &[],
            &security,
            "owns",
            &SubjectKey::Qualified(security.clone(), "owns".to_string()),
            &relations
        ));
    }
}
