//! ECS error types.

use std::fmt;

use tessera_dsl::ParseError;
use thiserror::Error;

use crate::id::{Entity, Id};

/// Relationship constraint that a table transition can violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// The relation allows only one target per entity.
    Exclusive,
    /// The relation may not form a cycle.
    Acyclic,
    /// Targets must be children of the relation's declared scope.
    OneOf,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exclusive => "exclusive",
            Self::Acyclic => "acyclic",
            Self::OneOf => "one-of",
        };
        f.write_str(name)
    }
}

/// ECS error type.
#[derive(Debug, Error)]
pub enum EcsError {
    /// The entity's generation no longer matches; treat it as gone.
    #[error("stale entity reference: {0:?}")]
    StaleReference(Entity),

    /// A relationship constraint rejected the transition.
    #[error("{kind} constraint violated by ({relation}, {target})")]
    ConstraintViolation {
        relation: Entity,
        target: Entity,
        kind: Constraint,
    },

    /// Malformed or null id passed where a valid id was expected.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Id does not carry data of the requested type.
    #[error("id {id} does not hold a {type_name}")]
    TypeMismatch { id: Id, type_name: &'static str },

    /// Mutation attempted while the world is readonly and not deferring.
    #[error("world is readonly")]
    ReadonlyViolation,

    /// Rule compilation failed.
    #[error("invalid query: {0}")]
    Query(String),

    /// Query string could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
