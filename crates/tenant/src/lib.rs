//! Tenant binding and per-call actor/viewer context (spec §4.1, §4.6).
//!
//! Nothing here touches the database: a [`TenantSession`] is just the
//! namespace a caller has bound to, and an [`ActorContext`]/[`Viewer`] are
//! plain values threaded through every `authgraph-authz` call instead of
//! living as ambient session or thread-local state.

pub mod actor;
pub mod session;
pub mod viewer;

pub use actor::ActorContext;
pub use session::TenantSession;
pub use viewer::Viewer;
