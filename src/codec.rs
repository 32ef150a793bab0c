//! Body encoding and typed response shapes

use std::ops::{Deref, DerefMut};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Serialize `value` as a JSON request body
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::BodyEncoding(e.into()))
}

/// Decode a JSON body, optionally taking only the value under a top-level key.
///
/// Failures keep the raw bytes so the caller can inspect what was received.
pub fn decode_json<T: DeserializeOwned>(body: &Bytes, key: Option<&str>) -> Result<T> {
    let failure = |reason: String| Error::DecodingFailure {
        body: body.clone(),
        reason,
    };

    match key {
        None => serde_json::from_slice(body).map_err(|e| failure(e.to_string())),
        Some(key) => {
            let mut document: serde_json::Value =
                serde_json::from_slice(body).map_err(|e| failure(e.to_string()))?;
            let value = document
                .get_mut(key)
                .map(serde_json::Value::take)
                .ok_or_else(|| failure(format!("missing key `{}`", key)))?;
            serde_json::from_value(value).map_err(|e| failure(e.to_string()))
        }
    }
}

/// A shape a successful response body can be turned into.
///
/// The expected shape is a type parameter of each submission, so the request
/// and the decoder agree at compile time.
pub trait FromResponse: Sized + Send + 'static {
    /// Build the value from a 2xx body
    fn from_response(body: Bytes, key: Option<&str>) -> Result<Self>;
}

/// Raw bytes, returned as-is even when empty
impl FromResponse for Bytes {
    fn from_response(body: Bytes, _key: Option<&str>) -> Result<Self> {
        Ok(body)
    }
}

impl FromResponse for String {
    fn from_response(body: Bytes, _key: Option<&str>) -> Result<Self> {
        String::from_utf8(body.to_vec()).map_err(|e| Error::DecodingFailure {
            body,
            reason: e.to_string(),
        })
    }
}

/// Discards the body
impl FromResponse for () {
    fn from_response(_body: Bytes, _key: Option<&str>) -> Result<Self> {
        Ok(())
    }
}

/// A JSON-decoded response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the decoded value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> FromResponse for Json<T> {
    fn from_response(body: Bytes, key: Option<&str>) -> Result<Self> {
        decode_json(&body, key).map(Json)
    }
}
