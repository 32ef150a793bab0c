//! Transport abstraction for moving prepared requests over the network

pub mod types;

#[cfg(feature = "backend-reqwest")]
pub mod reqwest;

use futures_util::future::BoxFuture;

use crate::prepare::PreparedRequest;
use crate::registry::Progress;

pub use types::{Exchange, TransportError, TransportErrorKind};

/// Executes one attempt of a prepared request.
///
/// Implementations choose how to send the body from
/// [`PreparedBody`](crate::prepare::PreparedBody): buffered bytes, a file
/// streamed from disk, or nothing. Upload progress is reported through
/// `progress`. Every failure is reported inside the returned [`Exchange`];
/// the future itself never fails.
///
/// The engine enforces cancellation by dropping the future, so
/// implementations must not rely on running to completion.
pub trait Transport: Send + Sync + 'static {
    /// Start the attempt
    fn execute(&self, request: PreparedRequest, progress: Progress) -> BoxFuture<'static, Exchange>;
}

#[cfg(feature = "backend-reqwest")]
pub use self::reqwest::ReqwestTransport;
