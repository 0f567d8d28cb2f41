use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Categorizes errors for caller decision-making.
///
/// A lightweight, copyable view of [`Error`] for code that only needs to
/// branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Every backup origin was tried and none answered
    OriginsExhausted,
    /// The wrapped pub/sub client reported an error
    Client,
    /// Configuration rejected at construction
    Config,
    /// The HTTP stack used for probing could not be set up
    Http,
    /// A remote action timed out
    Timeout,
    /// Manager is shutting down
    ShuttingDown,
}

/// Errors that can occur in multiregion-pubsub
#[derive(Error, Debug)]
pub enum Error {
    /// Escalation ran past the end of the backup origin list
    #[error("All backup origins are exhausted after {attempted} attempts. Probably the internet is down?")]
    OriginsExhausted { attempted: usize },

    /// Client creation or teardown failed
    #[error("Client error: {0}")]
    Client(String),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote action issued through the client timed out
    #[error("Remote action timed out: {0}")]
    Timeout(String),

    /// Manager is shutting down
    #[error("Manager is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OriginsExhausted { .. } => ErrorKind::OriginsExhausted,
            Error::Client(_) => ErrorKind::Client,
            Error::Config(_) => ErrorKind::Config,
            Error::Http(_) => ErrorKind::Http,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Whether a call failing with this error should be retried elsewhere.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Whether this is the terminal origin-exhaustion failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::OriginsExhausted { .. })
    }
}

/// Reasons a reachability probe did not pass.
///
/// Probe failures never leave the crate through the public control surface;
/// they only drive the diagnosis and reconnection retry loops.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The probe URL could not be built from the origin
    #[error("Invalid probe URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request did not complete
    #[error("Probe request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not JSON
    #[error("Probe response not parseable: {0}")]
    Body(#[from] serde_json::Error),

    /// The probe did not finish within the configured timeout
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    /// Probe implementation specific failure
    #[error("Probe failed: {0}")]
    Other(String),
}
