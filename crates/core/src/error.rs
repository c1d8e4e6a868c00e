//! Error taxonomy shared across the server
//!
//! Every failure is classified into one of the kinds below; the turn
//! controller decides fatality from the kind, never from the message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed or unexpected control frame. Fatal to the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Temporary STT/LLM/TTS failure. The affected turn fails, the
    /// session returns to idle with history unchanged.
    #[error("{component} failure: {message}")]
    ProviderTransient { component: &'static str, message: String },

    /// Authentication or quota failure. Non-recoverable for the session.
    #[error("{component} fatal failure: {message}")]
    ProviderFatal { component: &'static str, message: String },

    /// A named timeout fired. Behaves as a transient failure for the turn.
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// Cooperative cancellation. Never surfaced to the client as an error.
    #[error("cancelled")]
    Cancelled,
}

/// Coarse classification used on the wire (`error` marker `kind` field)
/// and by the controller to decide fatality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    ProviderTransient,
    ProviderFatal,
    Timeout,
    Cancelled,
}

impl Error {
    pub fn transient(component: &'static str, message: impl Into<String>) -> Self {
        Self::ProviderTransient {
            component,
            message: message.into(),
        }
    }

    pub fn fatal(component: &'static str, message: impl Into<String>) -> Self {
        Self::ProviderFatal {
            component,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ProviderTransient { .. } => ErrorKind::ProviderTransient,
            Error::ProviderFatal { .. } => ErrorKind::ProviderFatal,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Protocol | ErrorKind::ProviderFatal)
    }

    /// Wire name for the `error` marker.
    pub fn kind_str(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::ProviderFatal => "provider_fatal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}
