//! Turning request descriptors into transport-ready requests

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::config::ClientConfig;
use crate::multipart::{MultipartEncoder, generate_boundary};
use crate::request::{Request, RequestId};
use crate::{Error, Result};

/// Encoded multipart bodies below this many bytes are kept in memory when the
/// caller waits for the outcome; anything else is streamed from a temp file.
pub const MULTIPART_MEMORY_THRESHOLD: u64 = 10_000_000;

/// How a multipart body may be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Small bodies may be buffered in memory
    Buffered,
    /// Always encode to a temp file, used for fire-and-forget uploads
    AlwaysStream,
}

/// Request body in the form the transport sends it
#[derive(Debug, Clone, Default)]
pub enum PreparedBody {
    /// No body
    #[default]
    Empty,
    /// In-memory body
    Bytes(Bytes),
    /// Body streamed from a file on disk
    File {
        /// Path of the encoded body
        path: PathBuf,
        /// File size, zero if it could not be read
        len: u64,
    },
}

impl PreparedBody {
    /// Temp file path, for file bodies
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            PreparedBody::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Byte length of the body, if known
    pub fn len(&self) -> Option<u64> {
        match self {
            PreparedBody::Empty => Some(0),
            PreparedBody::Bytes(bytes) => Some(bytes.len() as u64),
            PreparedBody::File { len: 0, .. } => None,
            PreparedBody::File { len, .. } => Some(*len),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PreparedBody::Empty => "empty",
            PreparedBody::Bytes(_) => "buffered",
            PreparedBody::File { .. } => "file",
        }
    }
}

/// Fully resolved request handed to a [`Transport`](crate::Transport)
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Identity of the originating request
    pub id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Absolute URL including the query
    pub url: Url,
    /// Final header set
    pub headers: HeaderMap,
    /// Body
    pub body: PreparedBody,
    /// Timeout the transport must enforce
    pub timeout: Duration,
}

impl PreparedRequest {
    /// Short description used in log lines
    pub(crate) fn body_kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// Resolve `request` against the client configuration.
///
/// Fails with [`Error::InvalidUrl`] when no usable absolute URL results, and
/// with [`Error::BodyEncoding`] when a multipart body cannot be written.
pub fn prepare(
    request: &Request,
    config: &ClientConfig,
    encoder: &dyn MultipartEncoder,
    mode: BodyMode,
) -> Result<PreparedRequest> {
    let url = resolve_url(
        config.base_url.as_ref(),
        &request.path,
        &request.query,
        request.query_encoded,
    )?;

    let mut headers = config.default_headers.clone();
    for (name, value) in &request.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header {:?} on {}", name, request.id()),
        }
    }

    let body = if !request.parts.is_empty() {
        let boundary = generate_boundary();
        let content_length = encoder.content_length(&request.parts, &boundary);

        let body = if mode == BodyMode::Buffered && content_length < MULTIPART_MEMORY_THRESHOLD {
            let bytes = encoder
                .encode(&request.parts, &boundary)
                .map_err(Error::BodyEncoding)?;
            PreparedBody::Bytes(bytes)
        } else {
            let path = encoder
                .encode_to_temp_file(&request.parts, &boundary)
                .map_err(Error::BodyEncoding)?;
            let len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            PreparedBody::File { path, len }
        };

        let content_type = format!("multipart/form-data; boundary={}", boundary);
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        if let Some(len) = body.len() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        body
    } else if let Some(bytes) = &request.body {
        PreparedBody::Bytes(bytes.clone())
    } else {
        PreparedBody::Empty
    };

    let timeout = if request.timeout.is_zero() {
        config.timeout
    } else {
        request.timeout
    };

    Ok(PreparedRequest {
        id: request.id(),
        method: request.method.clone(),
        url,
        headers,
        body,
        timeout,
    })
}

/// Resolve a request path against an optional base URL and append the query.
///
/// - an absolute `http(s)` URL is used verbatim;
/// - a path starting with `/` replaces the base URL's path entirely (a root
///   base such as `https://host/` therefore never yields a double separator);
/// - anything else is appended as a path segment to the base URL's path.
pub fn resolve_url(
    base: Option<&Url>,
    path: &str,
    query: &[(String, String)],
    pre_encoded: bool,
) -> Result<Url> {
    let mut url = if is_absolute_url(path) {
        Url::parse(path).map_err(|e| Error::InvalidUrl(format!("{}: {}", path, e)))?
    } else {
        let base = base.ok_or_else(|| {
            Error::InvalidUrl(format!("relative path `{}` without a base URL", path))
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("`{}` cannot be a base URL", base)));
        }

        let (path_part, path_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if path_part.starts_with('/') {
            url.set_path(path_part);
        } else if !path_part.is_empty() {
            let joined = format!("{}/{}", base.path().trim_end_matches('/'), path_part);
            url.set_path(&joined);
        }
        url.set_query(path_query);
        url
    };

    if !query.is_empty() {
        let pairs = query
            .iter()
            .map(|(name, value)| {
                if pre_encoded {
                    format!("{}={}", name, value)
                } else {
                    format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(value)
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        let combined = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, pairs),
            _ => pairs,
        };
        url.set_query(Some(&combined));
    }

    let url = Url::parse(url.as_str()).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(url)
}

fn is_absolute_url(path: &str) -> bool {
    path.get(..4)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"))
        && Url::parse(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MultipartPart;
    use crate::multipart::FormDataEncoder;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn config(base_url: &str) -> ClientConfig {
        ClientConfig {
            base_url: Some(base(base_url)),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_absolute_path_replaces_base_path() {
        let url = resolve_url(Some(&base("https://api.example.com/v1/")), "/users", &[], false).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/users");
    }

    #[test]
    fn test_relative_path_appends_to_base() {
        let url = resolve_url(Some(&base("https://api.example.com/v1/")), "users", &[], false).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users");

        let url = resolve_url(Some(&base("https://api.example.com/v1")), "users/7", &[], false).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/7");
    }

    #[test]
    fn test_absolute_url_is_used_verbatim() {
        let url = resolve_url(
            Some(&base("https://api.example.com/v1/")),
            "https://other.example.com/x",
            &[],
            false,
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/x");

        let url = resolve_url(None, "HTTP://other.example.com/y", &[], false).unwrap();
        assert_eq!(url.as_str(), "http://other.example.com/y");
    }

    #[test]
    fn test_root_base_has_single_separator() {
        let url = resolve_url(Some(&base("https://api.example.com/")), "/users", &[], false).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/users");
    }

    #[test]
    fn test_query_is_percent_encoded() {
        let query = vec![
            ("q".to_string(), "a b&c".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        let url = resolve_url(Some(&base("https://api.example.com/")), "search", &query, false).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/search?q=a%20b%26c&page=2");
    }

    #[test]
    fn test_pre_encoded_query_is_not_reencoded() {
        let query = vec![("filter".to_string(), "name%3Dada".to_string())];
        let url = resolve_url(Some(&base("https://api.example.com/")), "users?sort=asc", &query, true).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/users?sort=asc&filter=name%3Dada");
    }

    #[test]
    fn test_unresolvable_urls() {
        assert!(matches!(
            resolve_url(None, "users", &[], false),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            resolve_url(Some(&base("mailto:someone@example.com")), "users", &[], false),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            resolve_url(None, "http://", &[], false),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_header_merge_order() {
        let mut config = config("https://api.example.com/");
        config
            .default_headers
            .insert("x-env", HeaderValue::from_static("prod"));
        config
            .default_headers
            .insert("accept", HeaderValue::from_static("*/*"));

        let request = Request::post("/upload")
            .header("Accept", "application/json")
            .header("Content-Type", "text/plain")
            .part(MultipartPart::text("a", "b"));

        let prepared = prepare(&request, &config, &FormDataEncoder::new(), BodyMode::Buffered).unwrap();
        assert_eq!(prepared.headers["x-env"], "prod");
        assert_eq!(prepared.headers["accept"], "application/json");
        let content_type = prepared.headers[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let length: u64 = prepared.headers[CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        assert_eq!(Some(length), prepared.body.len());
    }

    #[test]
    fn test_timeout_falls_back_to_client_default() {
        let config = ClientConfig {
            timeout: Duration::from_secs(42),
            ..config("https://api.example.com/")
        };
        let encoder = FormDataEncoder::new();

        let prepared = prepare(&Request::get("/a"), &config, &encoder, BodyMode::Buffered).unwrap();
        assert_eq!(prepared.timeout, Duration::from_secs(42));

        let request = Request::get("/a").timeout(Duration::from_secs(3));
        let prepared = prepare(&request, &config, &encoder, BodyMode::Buffered).unwrap();
        assert_eq!(prepared.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_raw_body_and_empty_body() {
        let config = config("https://api.example.com/");
        let encoder = FormDataEncoder::new();

        let prepared = prepare(&Request::post("/a").body("hi"), &config, &encoder, BodyMode::Buffered).unwrap();
        assert!(matches!(prepared.body, PreparedBody::Bytes(ref b) if b.as_ref() == b"hi"));

        let prepared = prepare(&Request::get("/a"), &config, &encoder, BodyMode::Buffered).unwrap();
        assert!(matches!(prepared.body, PreparedBody::Empty));
    }

    #[test]
    fn test_parts_take_precedence_over_body() {
        let config = config("https://api.example.com/");
        let request = Request::post("/a")
            .body("ignored")
            .part(MultipartPart::text("k", "v"));
        let prepared = prepare(&request, &config, &FormDataEncoder::new(), BodyMode::Buffered).unwrap();
        match prepared.body {
            PreparedBody::Bytes(bytes) => assert!(!bytes.windows(7).any(|w| w == b"ignored")),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    /// Parts sized so the encoded body is exactly `total` bytes
    fn parts_totaling(encoder: &FormDataEncoder, total: u64) -> (Vec<MultipartPart>, usize) {
        // Boundaries have a fixed length, so the framing overhead is stable.
        let framing = encoder.content_length(
            &[MultipartPart::file("blob", Bytes::new(), "blob.bin", None)],
            &generate_boundary(),
        );
        let payload = (total - framing) as usize;
        (
            vec![MultipartPart::file("blob", vec![b'x'; payload], "blob.bin", None)],
            payload,
        )
    }

    #[test]
    fn test_multipart_threshold_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FormDataEncoder::with_temp_dir(dir.path());
        let config = config("https://api.example.com/");

        let (parts, _) = parts_totaling(&encoder, MULTIPART_MEMORY_THRESHOLD - 1);
        let prepared = prepare(&Request::post("/u").parts(parts), &config, &encoder, BodyMode::Buffered).unwrap();
        match &prepared.body {
            PreparedBody::Bytes(bytes) => assert_eq!(bytes.len() as u64, MULTIPART_MEMORY_THRESHOLD - 1),
            other => panic!("expected in-memory body, got {other:?}"),
        }

        let (parts, _) = parts_totaling(&encoder, MULTIPART_MEMORY_THRESHOLD + 1);
        let prepared = prepare(&Request::post("/u").parts(parts), &config, &encoder, BodyMode::Buffered).unwrap();
        match &prepared.body {
            PreparedBody::File { path, len } => {
                assert!(path.exists());
                assert_eq!(*len, MULTIPART_MEMORY_THRESHOLD + 1);
                assert_eq!(prepared.headers[CONTENT_LENGTH], len.to_string().as_str());
            }
            other => panic!("expected file body, got {other:?}"),
        }
    }

    #[test]
    fn test_always_stream_mode_uses_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FormDataEncoder::with_temp_dir(dir.path());
        let request = Request::post("/u").part(MultipartPart::text("small", "x"));

        let prepared = prepare(&request, &config("https://h.example/"), &encoder, BodyMode::AlwaysStream).unwrap();
        assert!(prepared.body.file_path().is_some());
    }

    struct FailingEncoder {
        calls: AtomicUsize,
    }

    impl MultipartEncoder for FailingEncoder {
        fn content_length(&self, _parts: &[MultipartPart], _boundary: &str) -> u64 {
            MULTIPART_MEMORY_THRESHOLD
        }

        fn encode(&self, _parts: &[MultipartPart], _boundary: &str) -> io::Result<Bytes> {
            unreachable!("bodies at the threshold are never buffered")
        }

        fn encode_to_temp_file(&self, _parts: &[MultipartPart], _boundary: &str) -> io::Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
        }
    }

    #[test]
    fn test_exact_threshold_streams_and_reports_encoding_failure() {
        let encoder = FailingEncoder {
            calls: AtomicUsize::new(0),
        };
        let request = Request::post("/u").part(MultipartPart::text("a", "b"));
        let err = prepare(&request, &config("https://h.example/"), &encoder, BodyMode::Buffered).unwrap_err();
        assert!(matches!(err, Error::BodyEncoding(_)));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
    }
}
