use thiserror::Error;

/// Top-level error type for the Icy plugin pipeline.
#[derive(Debug, Error)]
pub enum IcyError {
    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("malformed plugin descriptor: {0}")]
    Descriptor(String),

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("invalid plugin archive: {0}")]
    InvalidArchive(String),

    #[error("missing plugin dependency: {0}")]
    MissingDependency(String),

    #[error("unknown plugin entry point: {0}")]
    EntryPointNotFound(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("operation cancelled")]
    Cancelled,

    #[error("service stopped: {0}")]
    ServiceStopped(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IcyError {
    /// True when the error stands for a user or shutdown interruption rather than a failure.
    pub fn is_interruption(&self) -> bool {
        matches!(self, IcyError::Interrupted | IcyError::Cancelled)
    }
}

/// Looks through an `anyhow` chain for an interruption marker.
pub fn is_interruption(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<IcyError>())
        .any(IcyError::is_interruption)
}
