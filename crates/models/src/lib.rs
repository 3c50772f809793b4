pub mod audit;
pub mod entity;
pub mod hierarchy;
pub mod namespace;
pub mod tuple;
pub mod validation;

pub use audit::{AuditEvent, AuditEventQuery, AuditEventType, NewAuditEvent};
pub use entity::EntityRef;
pub use hierarchy::HierarchyRule;
pub use namespace::Namespace;
pub use tuple::{RelationTuple, SubjectKey};
pub use validation::ValidationError;
