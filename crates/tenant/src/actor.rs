/// Who is performing a write, and why (spec §4.1 "set_actor"/"clear_actor").
///
/// Every mutating `authgraph-authz` call takes one of these by reference
/// and stamps it onto the resulting audit event. Mirrors the four
/// parameters the original `set_actor` call took (`actor_id`, `request_id`,
/// `on_behalf_of`, `reason`) as an explicit value rather than session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub on_behalf_of: Option<String>,
    pub reason: Option<String>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_on_behalf_of(mut self, on_behalf_of: impl Into<String>) -> Self {
        self.on_behalf_of = Some(on_behalf_of.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Overlay `other` on top of `self`: any field `other` sets wins, fields
    /// it leaves `None` fall back to `self`. Used when a caller supplies a
    /// per-call override (e.g. `on_behalf_of`) on top of a session-wide
    /// default actor.
    pub fn merge(&self, other: &ActorContext) -> ActorContext {
        ActorContext {
            actor_id: other.actor_id.clone().or_else(|| self.actor_id.clone()),
            request_id: other.request_id.clone().or_else(|| self.request_id.clone()),
            on_behalf_of: other.on_behalf_of.clone().or_else(|| self.on_behalf_of.clone()),
            reason: other.reason.clone().or_else(|| self.reason.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_override_fields() {
        let base = ActorContext::new("svc-scheduler").with_reason("periodic sweep");
        let override_ctx = ActorContext::default().with_reason("manual rerun");
        let merged = base.merge(&override_ctx);
        assert_eq!(merged.actor_id.as_deref(), Some("svc-scheduler"));
        assert_eq!(merged.reason.as_deref(), Some("manual rerun"));
    }

    #[test]
    fn system_context_has_no_actor() {
        assert_eq!(ActorContext::system(), ActorContext::default());
    }
}
