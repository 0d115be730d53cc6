use thiserror::Error;

/// Everything that can go wrong while naming, resolving or moving objects.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed name: {0}")]
    MalformedName(String),

    #[error("nih checksum mismatch: expected '{expected}', got '{actual}'")]
    MalformedChecksum { expected: char, actual: String },

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("integrity check failed for {0}")]
    IntegrityFailure(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid mount template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("invalid route pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("table file line {line}: {msg}")]
    Config { line: usize, msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Transport conditions a caller may reasonably try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unreachable(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fold an HTTP client failure into the transport part of the taxonomy.
pub(crate) fn from_ureq(e: ureq::Error, target: &str) -> Error {
    match e {
        ureq::Error::Status(code, _) => Error::Unreachable(format!("{} answered with status {}", target, code)),
        ureq::Error::Transport(t) => {
            let timed_out = std::error::Error::source(&t)
                .and_then(|s| s.downcast_ref::<std::io::Error>())
                .map(|io| matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock))
                .unwrap_or(false);
            if timed_out {
                Error::Timeout(format!("{}: {}", target, t))
            } else {
                Error::Unreachable(format!("{}: {}", target, t))
            }
        },
    }
}
