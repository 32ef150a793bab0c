//! Request lifecycle engine for HTTP clients
//!
//! This crate turns request descriptors into transport-ready requests, drives
//! them through a pluggable [`Transport`] with a bounded retry budget, and
//! tracks every in-flight call so it can be cancelled and its temporary
//! upload files cleaned up exactly once.
//!
//! ```no_run
//! use courier::{Client, Json, Request};
//!
//! # async fn run() -> courier::Result<()> {
//! let client = Client::builder()
//!     .base_url("https://api.example.com/v1/")?
//!     .retries(2)
//!     .build()?;
//!
//! let Json(names): Json<Vec<String>> = client
//!     .send(Request::get("users").query("active", "true").result_key("names"))
//!     .await?;
//! # let _ = names;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use auth::Auth;
pub use body::MultipartPart;
pub use client::{Client, ClientBuilder};
pub use codec::{FromResponse, Json};
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use error::{Error, Result};
pub use multipart::{FormDataEncoder, MultipartEncoder};
pub use prepare::{BodyMode, MULTIPART_MEMORY_THRESHOLD, PreparedBody, PreparedRequest};
pub use registry::{InFlightTask, Progress, ProgressCallback, TaskHandle, TaskRegistry};
pub use request::{Request, RequestId};
pub use response::ResponseMeta;
pub use transport::{Exchange, Transport, TransportError, TransportErrorKind};

#[cfg(feature = "backend-reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "backend-reqwest")))]
pub use transport::ReqwestTransport;

mod auth;
mod body;
mod client;
pub mod codec;
mod config;
mod error;
pub mod interpret;
pub mod multipart;
pub mod prepare;
mod registry;
mod request;
mod response;
pub mod retry;
pub mod transport;
