//! Error types and transport error classification

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

use crate::response::ResponseMeta;
use crate::transport::TransportError;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcomes of a failed logical call.
///
/// Every variant carries enough of the exchange (status, response metadata,
/// raw body) to render a message without going back to the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be resolved to a usable URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The caller or the client aborted the operation
    #[error("Request was cancelled")]
    Cancelled,

    /// Non-2xx response other than 401
    #[error("Request failed with status {status}")]
    FailedResponse {
        /// Status code of the response
        status: StatusCode,
        /// Response metadata
        response: ResponseMeta,
        /// Raw response body
        body: Bytes,
    },

    /// HTTP 401
    #[error("Unauthorized ({})", response.status())]
    Unauthorized {
        /// Response metadata
        response: ResponseMeta,
        /// Raw response body
        body: Bytes,
    },

    /// A 2xx body that could not be decoded into the expected shape
    #[error("Failed to decode response body: {reason}")]
    DecodingFailure {
        /// The bytes that failed to parse
        body: Bytes,
        /// Decoder message
        reason: String,
    },

    /// Connectivity, TLS or timeout failure reported by the transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The multipart body could not be materialized
    #[error("Failed to encode request body: {0}")]
    BodyEncoding(#[source] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry is allowed for this error, budget permitting.
    ///
    /// Status failures and transport failures may succeed on another attempt.
    /// Nothing else will: the URL, the body encoding and the payload of a 2xx
    /// response do not change between attempts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FailedResponse { .. } | Error::Unauthorized { .. } | Error::Transport(_)
        )
    }

    /// Whether this error reports a cancelled operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Status code of the response that produced this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::FailedResponse { status, .. } => Some(*status),
            Error::Unauthorized { response, .. } => Some(response.status()),
            _ => None,
        }
    }

    /// Raw response body attached to this error, if any
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Error::FailedResponse { body, .. }
            | Error::Unauthorized { body, .. }
            | Error::DecodingFailure { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Response metadata attached to this error, if any
    pub fn response(&self) -> Option<&ResponseMeta> {
        match self {
            Error::FailedResponse { response, .. } | Error::Unauthorized { response, .. } => {
                Some(response)
            }
            _ => None,
        }
    }
}
