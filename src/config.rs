//! Client-level configuration

use std::time::Duration;

use http::HeaderMap;
use url::Url;

/// Default timeout applied when a request does not set its own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by every request a client submits
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL relative request paths are resolved against
    pub base_url: Option<Url>,
    /// Timeout for requests that leave theirs at zero
    pub timeout: Duration,
    /// Headers sent with every request, overridable per request
    pub default_headers: HeaderMap,
    /// Retry budget for requests that do not set one
    pub retries: u32,
    /// Log outgoing requests
    pub log_requests: bool,
    /// Log received responses
    pub log_responses: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            default_headers: HeaderMap::new(),
            retries: 0,
            log_requests: false,
            log_responses: false,
        }
    }
}
