//! Types exchanged between the engine and transport implementations

use bytes::Bytes;
use thiserror::Error;

use crate::response::ResponseMeta;

/// Broad category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Could not connect (DNS, refused, reset before response)
    Connect,
    /// The resolved timeout elapsed
    Timeout,
    /// TLS handshake or certificate failure
    Tls,
    /// Reading the upload source or the response body failed
    Io,
    /// The operation was aborted
    Cancelled,
    /// Anything else
    Other,
}

/// Failure reported by a transport instead of (or while reading) a response
#[derive(Debug, Clone, Error)]
#[error("Transport error ({kind:?}): {message}")]
pub struct TransportError {
    /// Category
    pub kind: TransportErrorKind,
    /// Transport message
    pub message: String,
}

impl TransportError {
    /// Create a transport error
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

/// Everything one transport attempt produced.
///
/// Any combination may be present: a connection failure has only `error`, a
/// body read failure after the headers arrived has both `response` and
/// `error`.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    /// Status and headers, if a response started
    pub response: Option<ResponseMeta>,
    /// Body bytes received
    pub body: Bytes,
    /// Transport failure, if any
    pub error: Option<TransportError>,
}

impl Exchange {
    /// A completed response
    pub fn completed(response: ResponseMeta, body: impl Into<Bytes>) -> Self {
        Self {
            response: Some(response),
            body: body.into(),
            error: None,
        }
    }

    /// A failure before any response was received
    pub fn failed(error: TransportError) -> Self {
        Self {
            response: None,
            body: Bytes::new(),
            error: Some(error),
        }
    }

    /// An aborted attempt
    pub fn cancelled() -> Self {
        Self::failed(TransportError::new(
            TransportErrorKind::Cancelled,
            "operation cancelled",
        ))
    }
}
