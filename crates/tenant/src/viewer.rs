use authgraph_models::EntityRef;

/// Capability to see a subject's grants across tenant boundaries (spec
/// §4.6 "set_viewer"/"clear_viewer"). Holding a `Viewer` for `subject` is
/// what lets `list_external_resources` look past the bound tenant's own
/// namespace at tuples the subject holds in *other* namespaces, scoped to
/// global-hierarchy permissions only.
///
/// This is deliberately a value a caller passes in, not implicit session
/// state: a process handling several subjects concurrently never needs to
/// clear one viewer before setting another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    subject: EntityRef,
}

impl Viewer {
    pub fn new(subject: EntityRef) -> Self {
        Self { subject }
    }

    pub fn subject(&self) -> &EntityRef {
        &self.subject
    }

    pub fn is_viewing(&self, subject: &EntityRef) -> bool {
        &self.subject == subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_identifies_its_subject() {
        let subject = EntityRef::new("user", "alice").unwrap();
        let viewer = Viewer::new(subject.clone());
        assert!(viewer.is_viewing(&subject));
        assert_eq!(viewer.subject(), &subject);
    }
}
