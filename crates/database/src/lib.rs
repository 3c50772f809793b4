pub mod connection;
pub mod error;
pub mod lock;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{DatabaseError, Result};
pub use repositories::audit::AuditRepository;
pub use repositories::hierarchy::HierarchyRepository;
pub use repositories::tuples::TupleRepository;
