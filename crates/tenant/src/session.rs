use authgraph_models::Namespace;

/// The namespace a caller has bound to for the duration of a unit of work
/// (spec §4.1 "set_tenant"/"clear_tenant"). Every `authgraph-authz` and
/// `authgraph-database` operation takes a `&TenantSession` rather than
/// reading it from ambient state, so a process can hold several bound to
/// different tenants at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSession {
    namespace: Namespace,
}

impl TenantSession {
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Re-bind to a different namespace, consuming the old session
    /// ("clear_tenant" followed by "set_tenant" collapsed into one call).
    pub fn rebind(self, namespace: Namespace) -> Self {
        Self { namespace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_the_bound_namespace() {
        let ns = Namespace::new("acme-corp").unwrap();
        let session = TenantSession::new(ns.clone());
        assert_eq!(session.namespace(), &ns);
    }

    #[test]
    fn rebind_switches_namespace() {
        let session = TenantSession::new(Namespace::new("acme-corp").unwrap());
        let other = Namespace::new("globex").unwrap();
        let session = session.rebind(other.clone());
        assert_eq!(session.namespace(), &other);
    }
}
