//! Reqwest transport for cross-platform HTTP support

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream};
use tokio::io::AsyncReadExt;

use crate::prepare::{PreparedBody, PreparedRequest};
use crate::registry::Progress;
use crate::response::ResponseMeta;
use crate::transport::{Exchange, Transport, TransportError, TransportErrorKind};
use crate::{Error, Result};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Settings for the underlying reqwest client
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// User-Agent header sent with every request
    pub user_agent: Option<String>,
    /// Keep a cookie jar across requests
    pub use_cookies: bool,
    /// Limit on establishing a connection, separate from the request timeout
    pub connect_timeout: Option<Duration>,
}

/// Reqwest transport
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with reqwest's defaults
    pub fn new() -> Result<Self> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with configuration
    pub fn with_config(config: TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        if config.use_cookies {
            builder = builder.cookie_store(true);
        }

        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: PreparedRequest, progress: Progress) -> BoxFuture<'static, Exchange> {
        let client = self.client.clone();
        Box::pin(async move { execute(client, request, progress).await })
    }
}

async fn execute(client: reqwest::Client, request: PreparedRequest, progress: Progress) -> Exchange {
    let mut builder = client
        .request(request.method.clone(), request.url.clone())
        .headers(request.headers.clone())
        .timeout(request.timeout);

    // Buffered bodies are reported in one step once the request is on the wire
    let mut buffered_len = None;
    match request.body {
        PreparedBody::Empty => {}
        PreparedBody::Bytes(bytes) => {
            buffered_len = Some(bytes.len() as u64);
            builder = builder.body(bytes);
        }
        PreparedBody::File { path, len } => {
            let total = (len > 0).then_some(len);
            let stream = match file_stream(path, total, progress.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    return Exchange::failed(TransportError::new(
                        TransportErrorKind::Io,
                        format!("Failed to open upload body: {}", e),
                    ));
                }
            };
            builder = builder.body(reqwest::Body::wrap_stream(stream));
        }
    }

    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return Exchange::failed(map_error(&e)),
    };

    if let Some(len) = buffered_len {
        progress.report(len, Some(len));
    }

    let meta = ResponseMeta::new(
        response.status(),
        response.headers().clone(),
        response.url().clone(),
    );

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                return Exchange {
                    response: Some(meta),
                    body: Bytes::from(body),
                    error: Some(map_error(&e)),
                };
            }
        }
    }

    Exchange::completed(meta, body)
}

/// Stream a file from disk, reporting cumulative bytes as each chunk is read
async fn file_stream(
    path: PathBuf,
    total: Option<u64>,
    progress: Progress,
) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
    let file = tokio::fs::File::open(&path).await?;

    Ok(stream::unfold(
        Some((file, 0u64)),
        move |state| {
            let progress = progress.clone();
            async move {
                let Some((mut file, sent)) = state else {
                    return None;
                };
                let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let sent = sent + n as u64;
                        progress.report(sent, total);
                        Some((Ok(Bytes::from(buf)), Some((file, sent))))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        },
    ))
}

fn map_error(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Io
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error.to_string())
}
