//! Request descriptors

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::body::MultipartPart;
use crate::registry::ProgressCallback;
use crate::{Auth, Result};

/// Process-unique identity of a [`Request`].
///
/// Assigned when the request is constructed and used as the key of the
/// in-flight task registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the identifier
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Description of one logical HTTP call.
///
/// A `Request` carries no network state. It is resolved against the client
/// configuration at submission time, and the engine never mutates it: retries
/// are counted in a separate attempt context, so submitting the same value
/// again always starts with its full retry budget.
///
/// Cloning keeps the identifier. Two clones in flight at once share a registry
/// slot and the later submission supersedes the earlier one there.
///
/// # Examples
///
/// ```rust
/// use courier::{Auth, MultipartPart, Request};
/// use std::time::Duration;
///
/// let request = Request::post("/uploads")
///     .header("X-Upload-Source", "cli")
///     .query("overwrite", "true")
///     .part(MultipartPart::text("title", "Quarterly report"))
///     .auth(Auth::bearer("token"))
///     .timeout(Duration::from_secs(120))
///     .retries(2);
///
/// assert_eq!(request.retry_budget(), Some(2));
/// ```
#[derive(Clone)]
pub struct Request {
    id: RequestId,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) query_encoded: bool,
    pub(crate) body: Option<Bytes>,
    pub(crate) parts: Vec<MultipartPart>,
    pub(crate) timeout: Duration,
    pub(crate) retries: Option<u32>,
    pub(crate) result_key: Option<String>,
    pub(crate) log_request: bool,
    pub(crate) log_response: bool,
    pub(crate) progress_callback: Option<ProgressCallback>,
}

impl Request {
    /// Create a request for `path`, which may be relative to the client's
    /// base URL or an absolute `http(s)` URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            method,
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            query_encoded: false,
            body: None,
            parts: Vec::new(),
            timeout: Duration::ZERO,
            retries: None,
            result_key: None,
            log_request: true,
            log_response: true,
            progress_callback: None,
        }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Create a PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Create a PATCH request
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Create a DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Create a HEAD request
    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    /// Create a request whose body is `value` serialized as JSON, tagged with
    /// `Content-Type: application/json`
    pub fn json<T: serde::Serialize + ?Sized>(
        method: Method,
        path: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        let body = crate::codec::encode_json(value)?;
        Ok(Self::new(method, path)
            .header("Content-Type", "application/json")
            .body(body))
    }

    /// Add a header. Later headers with the same name replace earlier ones
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter, percent-encoded when the URL is built
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Mark all query parameters as already percent-encoded
    pub fn encoded_query(mut self, encoded: bool) -> Self {
        self.query_encoded = encoded;
        self
    }

    /// Set the raw request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a text body with a `text/plain` content type
    pub fn text(self, content: impl Into<String>) -> Self {
        self.header("Content-Type", "text/plain; charset=utf-8")
            .body(content.into())
    }

    /// Append a multipart part. Any parts take precedence over the raw body
    pub fn part(mut self, part: MultipartPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Append several multipart parts
    pub fn parts(mut self, parts: impl IntoIterator<Item = MultipartPart>) -> Self {
        self.parts.extend(parts);
        self
    }

    /// Attach a credential as the `Authorization` header
    pub fn auth(self, auth: Auth) -> Self {
        self.header("Authorization", auth.to_header_value())
    }

    /// Set the timeout. Zero means the client default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many times a failed attempt may be resubmitted
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Decode only the value under this top-level key of a JSON response
    pub fn result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    /// Enable or disable request logging for this call
    pub fn log_request(mut self, enabled: bool) -> Self {
        self.log_request = enabled;
        self
    }

    /// Enable or disable response logging for this call
    pub fn log_response(mut self, enabled: bool) -> Self {
        self.log_response = enabled;
        self
    }

    /// Set a callback receiving `(bytes_sent, total_bytes)` for every attempt
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Identity of this request
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path or absolute URL as given
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Headers in insertion order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Query parameters in insertion order
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// Raw body, if set
    pub fn raw_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Multipart parts in insertion order
    pub fn multipart_parts(&self) -> &[MultipartPart] {
        &self.parts
    }

    /// Configured retry budget, if set on the request
    pub fn retry_budget(&self) -> Option<u32> {
        self.retries
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers.len())
            .field("query", &self.query)
            .field("body", &self.body.as_ref().map(|b| b.len()))
            .field("parts", &self.parts.len())
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}
