//! Error types for the plumbing that can genuinely fail.
//!
//! Gameplay rejections (unknown ids, unmet prerequisites, wrong phase) are not
//! errors: engine operations report them as `false` or `None`.
use thiserror::Error;

/// Failure raised by a [`crate::ProgressStore`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("progress serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised while loading or validating content catalogs.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to parse {asset} content: {source}")]
    Parse {
        asset: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate {kind} id `{id}`")]
    Duplicate { kind: &'static str, id: String },
    #[error("{kind} `{id}` references unknown {target} `{reference}`")]
    DanglingReference {
        kind: &'static str,
        id: String,
        target: &'static str,
        reference: String,
    },
}

/// Raised when a persisted access level is outside `0..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access level {0} is out of range")]
pub struct InvalidAccessLevel(pub u8);
