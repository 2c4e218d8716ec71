//! Error types for the runtime crate.

use std::path::PathBuf;

use thiserror::Error;
use viewsync_core::{ContextId, DocumentError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure from an [`Engine`](crate::Engine) entry point. `E` is the view
/// function's own error type, carried through untouched.
#[derive(Debug, Error)]
pub enum EngineError<E> {
    #[error("view render failed: {0}")]
    View(#[source] E),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("unknown context: {0}")]
    UnknownContext(ContextId),
}
