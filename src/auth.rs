//! Credentials rendered into an `Authorization` header

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Credentials attached to a [`Request`](crate::Request) with
/// [`Request::auth`](crate::Request::auth).
///
/// `Debug` output never contains passwords, tokens or custom credentials.
///
/// ```rust
/// use courier::{Auth, Request};
///
/// let request = Request::get("/me").auth(Auth::basic("ada", "s3cret"));
/// assert_eq!(request.headers()[0].1, "Basic YWRhOnMzY3JldA==");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Basic base64(username:password)`
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// `Bearer <token>`
    Bearer {
        /// Token
        token: String,
    },
    /// `<scheme> <credentials>`, verbatim
    Custom {
        /// Scheme, e.g. `ApiKey`
        scheme: String,
        /// Credentials following the scheme
        credentials: String,
    },
}

impl Auth {
    /// Basic credentials
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Bearer token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Any other scheme
    pub fn custom(scheme: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self::Custom {
            scheme: scheme.into(),
            credentials: credentials.into(),
        }
    }

    /// Value of the `Authorization` header
    pub fn to_header_value(&self) -> String {
        match self {
            Auth::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
            Auth::Bearer { token } => format!("Bearer {}", token),
            Auth::Custom {
                scheme,
                credentials,
            } => format!("{} {}", scheme, credentials),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        match self {
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &REDACTED)
                .finish(),
            Auth::Bearer { .. } => f.debug_struct("Bearer").field("token", &REDACTED).finish(),
            Auth::Custom { scheme, .. } => f
                .debug_struct("Custom")
                .field("scheme", scheme)
                .field("credentials", &REDACTED)
                .finish(),
        }
    }
}
