//! Error definitions for the feature registry

use super::FeatureId;
use thiserror::Error;

/// Boxed error returned by adapter-supplied updaters
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which of the two states of a registration an identity clash involved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Internal,
    Container,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::Internal => write!(f, "internal"),
            StateKind::Container => write!(f, "container"),
        }
    }
}

/// Error types of the feature table and the mapped registry
///
/// All variants are local, synchronous failures of the call that violated
/// its contract. Nothing in this crate retries them.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// A required argument was missing or malformed (caller bug)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs a registration that does not exist
    #[error("feature \"{0}\" is not registered")]
    NotRegistered(FeatureId),

    /// The ID is already bound to a different feature object
    #[error("feature with ID \"{0}\" already present")]
    AlreadyRegistered(FeatureId),

    /// A freshly created state is an object already owned by another registration
    #[error(
        "{kind} state of feature \"{id}\" is the {existing_kind} state of feature \"{existing}\""
    )]
    StateCollision {
        id: FeatureId,
        kind: StateKind,
        existing: FeatureId,
        existing_kind: StateKind,
    },

    /// An adapter updater failed during an update pass
    #[error("updater of feature \"{id}\" failed: {source}")]
    UpdaterFailure {
        id: FeatureId,
        #[source]
        source: BoxError,
    },
}
