//! Per-page failures shared by the cache, the dispatcher and the server.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// No source file, a deleted file, or an unresolvable location value.
    #[error("not found: {0}")]
    NotFound(String),

    /// The page never compiled successfully. Carries the diagnostic.
    #[error("page `{page}` failed to compile: {diagnostic}")]
    CompileFailure { page: String, diagnostic: Arc<str> },

    /// Rendering failed or panicked. The compiled page stays valid.
    #[error("page `{page}` failed to render: {message}")]
    Render { page: String, message: String },
}

impl PageError {
    /// HTTP status for this failure.
    pub const fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::CompileFailure { .. } => 404,
            Self::Render { .. } => 500,
        }
    }
}
