use authgraph_models::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthzError>;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] authgraph_database::DatabaseError),

    #[error("adding this rule would create a cycle: {resource_type}.{permission} already (transitively) implies {implies}")]
    Cycle {
        resource_type: String,
        permission: String,
        implies: String,
    },

    #[error(
        "granting {relation} on {resource_type}:{resource_id} to {subject_type}:{subject_id} (subject_relation={subject_relation:?}) would create a circular group membership"
    )]
    MembershipCycle {
        resource_type: String,
        resource_id: String,
        relation: String,
        subject_type: String,
        subject_id: String,
        subject_relation: Option<String>,
    },

    #[error("tuple not found for {resource_type}:{resource_id}#{relation}")]
    TupleNotFound {
        resource_type: String,
        resource_id: String,
        relation: String,
    },

    #[error("no viewer bound for cross-tenant lookup")]
    NoViewerBound,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
