//! Error types for device links.

use std::fmt;
use std::io;

/// Errors that prevent a [`DeviceConnection`](crate::DeviceConnection) from
/// being created.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    /// The port is zero or outside the transport's range.
    #[error("Invalid device port {0}: expected 1..={max}", max = crate::MAX_PORT)]
    InvalidPort(u32),

    /// The notification thread could not be started.
    #[error("Failed to start event dispatcher: {0}")]
    Dispatcher(#[source] io::Error),
}

/// The two kinds of failure a link reports to its observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// The endpoint could not be reached or opened.
    #[error("device not available")]
    DeviceNotAvailable,
    /// A read or write failed on an established stream.
    #[error("data stream error")]
    DataStreamError,
}

impl ErrorKind {
    /// Stable numeric code for this kind.
    pub fn code(self) -> i64 {
        match self {
            Self::DeviceNotAvailable => 1,
            Self::DataStreamError => 2,
        }
    }
}

/// A failure on a device link: domain, kind and an optional message.
///
/// Raw transport errors never leave the connection; they are folded into one
/// of these with the transport's message attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkError {
    kind: ErrorKind,
    message: Option<String>,
}

impl LinkError {
    /// Error domain shared by every link error.
    pub const DOMAIN: &'static str = "device_link::DeviceConnection";

    /// Create an error of the given kind with no message.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Create an error of the given kind carrying a message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// A connect attempt failed.
    pub fn device_not_available(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::DeviceNotAvailable, message)
    }

    /// An established stream failed.
    pub fn data_stream(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::DataStreamError, message)
    }

    /// The error domain.
    pub fn domain(&self) -> &'static str {
        Self::DOMAIN
    }

    /// The kind of failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable numeric code, see [`ErrorKind::code`].
    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    /// Human-readable detail, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} ({}): {msg}", self.kind, self.code()),
            None => write!(f, "{} ({})", self.kind, self.code()),
        }
    }
}

impl std::error::Error for LinkError {}

/// A specialized Result type for link construction.
pub type Result<T> = std::result::Result<T, ConstructionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        assert_eq!(ErrorKind::DeviceNotAvailable.code(), 1);
        assert_eq!(ErrorKind::DataStreamError.code(), 2);
    }

    #[test]
    fn test_link_error_accessors() {
        let err = LinkError::device_not_available("connection refused");
        assert_eq!(err.domain(), LinkError::DOMAIN);
        assert_eq!(err.kind(), ErrorKind::DeviceNotAvailable);
        assert_eq!(err.code(), 1);
        assert_eq!(err.message(), Some("connection refused"));
    }

    #[test]
    fn test_link_error_display() {
        let err = LinkError::data_stream("broken pipe");
        assert_eq!(err.to_string(), "data stream error (2): broken pipe");

        let bare = LinkError::new(ErrorKind::DeviceNotAvailable);
        assert_eq!(bare.to_string(), "device not available (1)");
        assert_eq!(bare.message(), None);
    }

    #[test]
    fn test_invalid_port_display() {
        let err = ConstructionError::InvalidPort(0);
        assert_eq!(err.to_string(), "Invalid device port 0: expected 1..=65535");
    }
}
