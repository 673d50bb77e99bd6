//! Error types for the store and for transitions.
//!
//! [`StoreError`] is what `mutate` and `current_state` fail with. It is
//! never swallowed by the store: `Unavailable` and `Conflict` always reach
//! the caller, which maps them to a response via
//! [`StoreError::status_code`].
//!
//! [`TransitionError`] is a *normal* outcome. Transitions that reject a
//! request return it inside their result with no next state, so nothing is
//! written.

use town_economy::EconomyError;
use town_world::WorldError;

/// Errors raised by the snapshot reader and the mutation queue.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The state file exists but cannot be parsed.
    #[error("state file unavailable: {reason}")]
    Unavailable {
        /// Why parsing failed.
        reason: String,
    },

    /// Another writer committed between read and write on every attempt.
    #[error("write conflict after {attempts} attempts")]
    Conflict {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Reading or writing the state file failed.
    #[error("state file I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The next state could not be serialized.
    #[error("failed to serialize state: {source}")]
    Serialization {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// The queue consumer has shut down.
    #[error("mutation queue closed")]
    QueueClosed,
}

impl StoreError {
    /// HTTP-equivalent status for the routing layer.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unavailable { .. } => 503,
            Self::Conflict { .. } => 409,
            Self::Io { .. } | Self::Serialization { .. } | Self::QueueClosed => 500,
        }
    }

    /// Whether retrying the whole operation later could succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable { .. })
    }
}

/// Why a transition declined to produce a next state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The request names an entity that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request is well-formed but cannot be honored.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A layout edit was rejected.
    #[error(transparent)]
    World(#[from] WorldError),

    /// A purchase, consumption or debit was rejected.
    #[error(transparent)]
    Economy(#[from] EconomyError),
}

impl TransitionError {
    /// HTTP-equivalent status for the routing layer.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_)
            | Self::World(WorldError::UnknownBuilding(_) | WorldError::DecorationNotFound(_))
            | Self::Economy(EconomyError::UnknownItem(_)) => 404,
            _ => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(StoreError::Conflict { attempts: 3 }.status_code(), 409);
        assert_eq!(
            StoreError::Unavailable {
                reason: "bad yaml".to_owned()
            }
            .status_code(),
            503
        );
        assert_eq!(StoreError::QueueClosed.status_code(), 500);
        assert_eq!(TransitionError::NotFound("x".to_owned()).status_code(), 404);
        assert_eq!(
            TransitionError::from(EconomyError::ZeroQuantity).status_code(),
            400
        );
        assert_eq!(
            TransitionError::from(WorldError::DecorationNotFound("d".to_owned())).status_code(),
            404
        );
    }
}
