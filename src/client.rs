//! HTTP client implementation
//!
//! A [`Client`] composes the request lifecycle for every call: the request is
//! prepared once, registered as an [`InFlightTask`], and driven through
//! sequential transport attempts until the retry controller declares an
//! outcome terminal. Cleanup (registry removal and temp file deletion) runs
//! once per call, after which the caller's continuation is dispatched on the
//! completion runtime.

use std::sync::{Arc, Weak};
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use tokio::runtime::Handle;
use url::Url;

use crate::codec::FromResponse;
use crate::config::ClientConfig;
use crate::interpret::interpret;
use crate::multipart::{FormDataEncoder, MultipartEncoder};
use crate::prepare::{BodyMode, PreparedRequest, prepare};
use crate::registry::{InFlightTask, Progress, TaskHandle, TaskRegistry};
use crate::request::{Request, RequestId};
use crate::retry::{AttemptContext, should_retry};
use crate::transport::{Exchange, Transport};
use crate::{Error, Result};

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// HTTP client for making requests
///
/// Cloning is cheap; all clones share configuration, transport and the task
/// registry.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    encoder: Arc<dyn MultipartEncoder>,
    registry: TaskRegistry,
    runtime: Handle,
    completion: Handle,
}

/// Whether the client that started a call still exists at an attempt boundary
enum Liveness {
    Alive(Arc<ClientInner>),
    TornDown,
}

impl Liveness {
    fn check(client: &Weak<ClientInner>) -> Self {
        match client.upgrade() {
            Some(inner) => Liveness::Alive(inner),
            None => Liveness::TornDown,
        }
    }
}

/// Per-call values resolved from the request and the client configuration
struct CallSettings {
    budget: u32,
    result_key: Option<String>,
    log_request: bool,
    log_response: bool,
}

impl Client {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Configuration shared by every request of this client
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Submit a request and deliver its outcome to `continuation`.
    ///
    /// The continuation runs exactly once on the completion runtime, after the
    /// last attempt. When the request cannot be prepared (invalid URL or
    /// unencodable body) it is instead called synchronously with the error,
    /// before `submit` returns `None`.
    pub fn submit<T, F>(&self, request: Request, continuation: F) -> Option<TaskHandle>
    where
        T: FromResponse,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.start::<T>(request, BodyMode::Buffered, Some(Box::new(continuation)))
    }

    /// Submit a request nobody waits on.
    ///
    /// Multipart bodies are always streamed from a temp file. The task is
    /// still registered, so progress and cancellation work through the
    /// returned handle; the outcome is only logged.
    pub fn submit_detached(&self, request: Request) -> Option<TaskHandle> {
        self.start::<bytes::Bytes>(request, BodyMode::AlwaysStream, None)
    }

    /// Submit a request and wait for its outcome
    pub async fn send<T: FromResponse>(&self, request: Request) -> Result<T> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.submit::<T, _>(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Cancel the in-flight call started from request `id`.
    ///
    /// Returns `false` if no such call is registered.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.registry.find(id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight call
    pub fn cancel_all(&self) {
        for task in self.inner.registry.snapshot().iter() {
            task.cancel();
        }
    }

    /// Number of calls that have not reached their terminal outcome
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Handle to the in-flight call started from request `id`
    pub fn task(&self, id: RequestId) -> Option<TaskHandle> {
        self.inner.registry.find(id).map(TaskHandle::new)
    }

    /// The registry of in-flight calls
    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    fn start<T: FromResponse>(
        &self,
        request: Request,
        mode: BodyMode,
        continuation: Option<Continuation<T>>,
    ) -> Option<TaskHandle> {
        let inner = &self.inner;

        let prepared = match prepare(&request, &inner.config, inner.encoder.as_ref(), mode) {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::warn!("Failed to prepare {}: {}", request.id(), error);
                if let Some(continuation) = continuation {
                    continuation(Err(error));
                }
                return None;
            }
        };

        let settings = CallSettings {
            budget: request.retries.unwrap_or(inner.config.retries),
            result_key: request.result_key.clone(),
            log_request: request.log_request && inner.config.log_requests,
            log_response: request.log_response && inner.config.log_responses,
        };

        let progress = Progress::new(
            request.progress_callback.clone(),
            Some(inner.completion.clone()),
        );
        let task = Arc::new(InFlightTask::new(
            prepared.id,
            prepared.body.file_path().cloned(),
            progress,
        ));

        if let Some(previous) = inner.registry.insert_or_update(task.clone()) {
            tracing::debug!(
                "{} resubmitted while in flight; superseding previous registration",
                previous.id()
            );
        }
        tracing::trace!("Registered {} ({} in flight)", task.id(), inner.registry.len());

        let registration = Registration {
            client: Arc::downgrade(inner),
            task: task.clone(),
        };
        inner.runtime.spawn(drive::<T>(
            registration,
            prepared,
            settings,
            inner.completion.clone(),
            continuation,
        ));

        Some(TaskHandle::new(task))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

/// Registry entry of one call. Dropping it removes the entry and deletes the
/// upload file, including when the driver future is dropped unpolled.
struct Registration {
    client: Weak<ClientInner>,
    task: Arc<InFlightTask>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        match Liveness::check(&self.client) {
            Liveness::Alive(inner) => {
                inner.registry.remove(&self.task);
                tracing::trace!("Removed {} ({} in flight)", self.task.id(), inner.registry.len());
            }
            Liveness::TornDown => self.task.finish(),
        }
    }
}

/// Run the attempts of one logical call and finalize it
async fn drive<T: FromResponse>(
    registration: Registration,
    prepared: PreparedRequest,
    settings: CallSettings,
    completion: Handle,
    continuation: Option<Continuation<T>>,
) {
    let client = registration.client.clone();
    let task = registration.task.clone();
    let mut context = AttemptContext::first(settings.budget);

    let outcome = loop {
        let inner = match Liveness::check(&client) {
            Liveness::Alive(inner) => inner,
            Liveness::TornDown => {
                tracing::debug!("Client dropped before attempt {} of {}", context.attempt(), task.id());
                break Err(Error::Cancelled);
            }
        };
        if task.is_cancelled() {
            break Err(Error::Cancelled);
        }

        let attempt = task.begin_attempt();
        if settings.log_request {
            tracing::debug!(
                "{} {} {} (attempt {}, body: {})",
                task.id(),
                prepared.method,
                prepared.url,
                attempt,
                prepared.body_kind()
            );
        }

        let exchange = tokio::select! {
            biased;
            _ = task.cancelled() => Exchange::cancelled(),
            exchange = inner.transport.execute(prepared.clone(), task.progress().clone()) => exchange,
        };
        drop(inner);

        if settings.log_response {
            match &exchange.response {
                Some(response) => tracing::debug!(
                    "{} {} ({} bytes)",
                    task.id(),
                    response.status(),
                    exchange.body.len()
                ),
                None => tracing::debug!("{} no response", task.id()),
            }
        }

        match interpret::<T>(exchange, settings.result_key.as_deref()) {
            Err(error) if should_retry(&context, &error) => {
                tracing::info!(
                    "Retrying {} after: {} ({} retries left)",
                    task.id(),
                    error,
                    context.remaining() - 1
                );
                context = context.next();
            }
            outcome => break outcome,
        }
    };

    // Progress callbacks are all delivered before the outcome
    task.progress().flush().await;
    drop(registration);

    match continuation {
        Some(continuation) => {
            completion.spawn(async move { continuation(outcome) });
        }
        None => match outcome {
            Ok(_) => tracing::debug!("Detached {} finished", task.id()),
            Err(error) => tracing::warn!("Detached {} failed: {}", task.id(), error),
        },
    }
}

/// Builder for creating HTTP clients
pub struct ClientBuilder {
    config: ClientConfig,
    user_agent: Option<String>,
    use_cookies: bool,
    connect_timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    encoder: Option<Arc<dyn MultipartEncoder>>,
    completion: Option<Handle>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            user_agent: None,
            use_cookies: false,
            connect_timeout: None,
            transport: None,
            encoder: None,
            completion: None,
        }
    }

    /// Set the base URL relative request paths are resolved against
    pub fn base_url(mut self, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("`{}` cannot be a base URL", url)));
        }
        self.config.base_url = Some(url);
        Ok(self)
    }

    /// Set the default request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connect timeout of the default transport
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Add a default header; invalid names or values are skipped
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.default_headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid default header {:?}", name),
        }
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Enable or disable the cookie jar of the default transport
    pub fn use_cookies(mut self, use_cookies: bool) -> Self {
        self.use_cookies = use_cookies;
        self
    }

    /// Set the default retry budget
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Log outgoing requests (requests can still opt out individually)
    pub fn log_requests(mut self, enabled: bool) -> Self {
        self.config.log_requests = enabled;
        self
    }

    /// Log received responses (requests can still opt out individually)
    pub fn log_responses(mut self, enabled: bool) -> Self {
        self.config.log_responses = enabled;
        self
    }

    /// Runtime continuations and progress callbacks are dispatched on
    pub fn completion_handle(mut self, handle: Handle) -> Self {
        self.completion = Some(handle);
        self
    }

    /// Use a custom transport instead of the default one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom multipart encoder
    pub fn multipart_encoder(mut self, encoder: Arc<dyn MultipartEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Build the client.
    ///
    /// Must be called from within a Tokio runtime; that runtime drives every
    /// call and, unless overridden, receives continuations.
    pub fn build(self) -> Result<Client> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::Internal(format!("Client must be built inside a Tokio runtime: {}", e))
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(self.user_agent, self.use_cookies, self.connect_timeout)?,
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
                encoder: self
                    .encoder
                    .unwrap_or_else(|| Arc::new(FormDataEncoder::new())),
                registry: TaskRegistry::new(),
                completion: self.completion.unwrap_or_else(|| runtime.clone()),
                runtime,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "backend-reqwest")]
fn default_transport(
    user_agent: Option<String>,
    use_cookies: bool,
    connect_timeout: Option<Duration>,
) -> Result<Arc<dyn Transport>> {
    use crate::transport::reqwest::{ReqwestTransport, TransportConfig};

    let transport = ReqwestTransport::with_config(TransportConfig {
        user_agent,
        use_cookies,
        connect_timeout,
    })?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "backend-reqwest"))]
fn default_transport(
    _user_agent: Option<String>,
    _use_cookies: bool,
    _connect_timeout: Option<Duration>,
) -> Result<Arc<dyn Transport>> {
    Err(Error::Internal(
        "No transport configured and the reqwest backend is disabled".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::transport::{TransportError, TransportErrorKind};

    struct Offline;

    impl Transport for Offline {
        fn execute(&self, _request: PreparedRequest, _progress: Progress) -> BoxFuture<'static, Exchange> {
            Box::pin(async {
                Exchange::failed(TransportError::new(TransportErrorKind::Connect, "offline"))
            })
        }
    }

    fn client() -> Client {
        Client::builder()
            .base_url("https://api.example.com/v1/")
            .unwrap()
            .transport(Arc::new(Offline))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = Client::builder()
            .transport(Arc::new(Offline))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_base_url_must_parse() {
        assert!(matches!(
            ClientBuilder::new().base_url("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_builder_populates_config() {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .retries(3)
            .header("X-Env", "test")
            .header("bad header", "x")
            .log_requests(true)
            .transport(Arc::new(Offline))
            .build()
            .unwrap();

        let config = client.config();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retries, 3);
        assert_eq!(config.default_headers["x-env"], "test");
        assert_eq!(config.default_headers.len(), 1);
        assert!(config.log_requests);
        assert!(!config.log_responses);
    }

    #[tokio::test]
    async fn test_invalid_url_is_delivered_synchronously() {
        let client = Client::builder()
            .transport(Arc::new(Offline))
            .build()
            .unwrap();

        let delivered = Arc::new(AtomicBool::new(false));
        let flag = delivered.clone();
        let handle = client.submit::<bytes::Bytes, _>(Request::get("relative/only"), move |result| {
            assert!(matches!(result, Err(Error::InvalidUrl(_))));
            flag.store(true, Ordering::SeqCst);
        });

        assert!(handle.is_none());
        assert!(delivered.load(Ordering::SeqCst));
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn test_unpolled_call_is_cleaned_up_on_runtime_shutdown() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let client = {
            let _enter = runtime.enter();
            Client::builder()
                .base_url("https://api.example.com/")
                .unwrap()
                .transport(Arc::new(Offline))
                .multipart_encoder(Arc::new(FormDataEncoder::with_temp_dir(dir.path())))
                .build()
                .unwrap()
        };

        let handle = client
            .submit_detached(Request::post("upload").part(crate::MultipartPart::text("a", "b")))
            .expect("request should be registered");
        let upload = handle.upload_file().expect("detached uploads use a temp file");
        assert!(upload.exists());
        assert_eq!(client.in_flight(), 1);

        // The driver was spawned but never polled
        drop(runtime);

        assert_eq!(client.in_flight(), 0);
        assert!(handle.is_finished());
        assert!(!upload.exists());
    }

    #[tokio::test]
    async fn test_cancel_unknown_id() {
        let client = client();
        assert!(!client.cancel(Request::get("/x").id()));
        assert!(client.task(Request::get("/x").id()).is_none());
    }
}
