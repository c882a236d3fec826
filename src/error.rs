use std::path::PathBuf;

use thiserror::Error;

use crate::response::FormatError;

/// Errors that end a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("failed to store message in {dir:?}: {source}")]
    Persist {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("transport already closed")]
    Closed,
}
