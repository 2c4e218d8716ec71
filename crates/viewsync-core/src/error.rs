//! Error types for the core library.

use std::path::PathBuf;

use thiserror::Error;

/// Failure from the template rendering collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("block {block:?} not found in template {template:?}")]
    BlockNotFound { template: String, block: String },
}

/// Failure while assembling a full HTML document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read shell template {path}: {source}")]
    ShellRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
