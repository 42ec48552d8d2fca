//! Error types for actor, topology and solver operations.

use thiserror::Error;

use crate::solver::BatchHandle;

/// Errors produced while building meshes, initializing actors or talking to a solver.
#[derive(Debug, Error)]
pub enum ClothError {
    /// The particle pool does not have enough free slots.
    #[error("could not allocate {requested} particles ({available} free)")]
    Allocation {
        /// Slots requested by the actor.
        requested: usize,
        /// Slots currently free in the pool.
        available: usize,
    },

    /// The cloth has no source topology assigned.
    #[error("no mesh topology assigned")]
    MissingTopology,

    /// The source topology exists but holds no geometry.
    #[error("mesh topology is not initialized")]
    UninitializedTopology,

    /// A triangle list could not be turned into a manifold half-edge mesh.
    #[error("invalid mesh topology: {0}")]
    InvalidTopology(String),

    /// The solver does not know the given constraint batch.
    #[error("unknown constraint batch {0:?}")]
    UnknownBatch(BatchHandle),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The actor is in the middle of initialization.
    #[error("actor is initializing")]
    Initializing,
}

impl ClothError {
    /// Create an invalid topology error.
    pub fn invalid_topology(msg: impl Into<String>) -> Self {
        Self::InvalidTopology(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result type for cloth operations.
pub type Result<T> = std::result::Result<T, ClothError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClothError::Allocation {
            requested: 12,
            available: 3,
        };
        assert_eq!(err.to_string(), "could not allocate 12 particles (3 free)");

        let err = ClothError::invalid_topology("edge 0->1 shared by 3 faces");
        assert!(err.to_string().contains("edge 0->1"));
    }
}
