//! Dispatch error taxonomy.

use crate::config::BackendKind;
use implmap_ir::{DescriptorError, PrimitiveKind};
use std::path::PathBuf;
use thiserror::Error;

/// Every failure raised while selecting, deriving, caching or running an
/// implementation. Each variant is attributable to a single node or to the
/// cache file as a whole.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No implementation applies to the (kind, backend) pair.
    #[error("no {backend} implementation for {kind}: {reason}")]
    NotFound {
        kind: PrimitiveKind,
        backend: BackendKind,
        reason: String,
    },

    /// Attributes are missing or malformed for the primitive kind.
    #[error("invalid descriptor `{node}`: {reason}")]
    InvalidDescriptor { node: String, reason: String },

    /// The binary cache cannot be decoded or does not match the graph.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// The cache file exists but could not be read. It is left in place.
    #[error("cannot read cache {}: {source}", path.display())]
    CacheUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisting the cache failed after every retry.
    #[error("failed to persist cache after {attempts} attempt(s): {source}")]
    SerializationIo {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("execution of `{node}` failed: {reason}")]
    Execution { node: String, reason: String },
}

impl DispatchError {
    pub fn not_registered(kind: PrimitiveKind, backend: BackendKind) -> Self {
        DispatchError::NotFound {
            kind,
            backend,
            reason: "no implementation registered".to_string(),
        }
    }

    pub fn invalid(node: impl Into<String>, reason: impl Into<String>) -> Self {
        DispatchError::InvalidDescriptor {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn corruption(reason: impl Into<String>) -> Self {
        DispatchError::CacheCorruption(reason.into())
    }

    pub fn is_cache_corruption(&self) -> bool {
        matches!(self, DispatchError::CacheCorruption(_))
    }
}

impl From<DescriptorError> for DispatchError {
    fn from(err: DescriptorError) -> Self {
        DispatchError::InvalidDescriptor {
            node: err.node,
            reason: err.reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
