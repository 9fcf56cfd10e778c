//! Error taxonomy shared by the credential cache, REST client, orchestrator and broker.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Errors that can occur while driving the provider's resource lifecycle.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Identity exchange failed (endpoint unreachable, non-success status, or
    /// unparseable token response).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with a status the calling operation does not accept.
    #[error("API error: StatusCode={status}, body: {body}")]
    Status { status: u16, body: String },

    /// Caller supplied an operation token that does not parse as `verb:name`.
    #[error("unrecognized operation: {0:?}")]
    MalformedToken(String),

    /// Instance id is not usable as a resource group name.
    #[error("invalid instance id {0:?}: not a valid resource group name")]
    InvalidInstanceId(String),

    /// Provider returned success but the body lacked the expected fields.
    #[error("Unexpected provider response: {0}")]
    ProviderState(String),

    /// Invalid configuration or request shape.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error annotated with the operation it surfaced from.
    #[error("{operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<BrokerError>,
    },
}

impl BrokerError {
    /// Wrap this error with the name of the operation that produced it.
    #[must_use]
    pub fn context(self, operation: &'static str) -> Self {
        Self::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any [`BrokerError::Context`] layers.
    #[must_use]
    pub fn root(&self) -> &BrokerError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status carried by the root error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Extension for attaching operation context to results.
pub trait ResultExt<T> {
    /// Wrap the error branch with `operation`.
    ///
    /// # Errors
    /// Returns the original error wrapped in [`BrokerError::Context`].
    fn op_context(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op_context(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}
