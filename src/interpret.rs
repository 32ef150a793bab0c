//! Classifying transport exchanges into typed outcomes

use http::StatusCode;

use crate::codec::FromResponse;
use crate::transport::{Exchange, TransportError, TransportErrorKind};
use crate::{Error, Result};

/// Turn one attempt's exchange into the expected shape or a classified error.
///
/// Cancellation wins over everything else. Without a response the transport
/// error is propagated. With a response, 401 and other non-2xx statuses are
/// reported with their body; a 2xx whose body could not be fully read is a
/// transport error; otherwise the body is decoded into `T`.
pub fn interpret<T: FromResponse>(exchange: Exchange, key: Option<&str>) -> Result<T> {
    let Exchange {
        response,
        body,
        error,
    } = exchange;

    if error
        .as_ref()
        .is_some_and(|e| e.kind == TransportErrorKind::Cancelled)
    {
        return Err(Error::Cancelled);
    }

    let Some(response) = response else {
        let error = error.unwrap_or_else(|| {
            TransportError::new(TransportErrorKind::Other, "no response received")
        });
        return Err(Error::Transport(error));
    };

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized { response, body });
    }
    if !status.is_success() {
        return Err(Error::FailedResponse {
            status,
            response,
            body,
        });
    }
    if let Some(error) = error {
        return Err(Error::Transport(error));
    }

    T::from_response(body, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Json;
    use crate::response::ResponseMeta;
    use bytes::Bytes;
    use http::HeaderMap;
    use url::Url;

    fn exchange(status: u16, body: &'static [u8]) -> Exchange {
        Exchange::completed(
            ResponseMeta::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Url::parse("https://api.example.com/x").unwrap(),
            ),
            Bytes::from_static(body),
        )
    }

    #[test]
    fn test_connectivity_failure_is_transport_error() {
        let failure = Exchange::failed(TransportError::new(TransportErrorKind::Connect, "refused"));
        match interpret::<Bytes>(failure, None) {
            Err(Error::Transport(e)) => assert_eq!(e.kind, TransportErrorKind::Connect),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_is_distinct() {
        assert!(matches!(
            interpret::<Bytes>(Exchange::cancelled(), None),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_unauthorized_carries_body() {
        match interpret::<Bytes>(exchange(401, b"token expired"), None) {
            Err(Error::Unauthorized { response, body }) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
                assert_eq!(body.as_ref(), b"token expired");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_non_2xx_is_failed_response() {
        for status in [301, 403, 404, 500, 503] {
            match interpret::<Bytes>(exchange(status, b"err"), None) {
                Err(Error::FailedResponse { status: s, body, .. }) => {
                    assert_eq!(s.as_u16(), status);
                    assert_eq!(body.as_ref(), b"err");
                }
                other => panic!("unexpected outcome for {status}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_2xx_is_raw_success() {
        let body = interpret::<Bytes>(exchange(204, b""), None).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_structured_decode_with_key() {
        let Json(ids): Json<Vec<u32>> =
            interpret(exchange(200, br#"{"items":[1,2,3]}"#), Some("items")).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_failure_keeps_raw_bytes() {
        match interpret::<Json<Vec<u32>>>(exchange(200, b"not json"), None) {
            Err(Error::DecodingFailure { body, .. }) => assert_eq!(body.as_ref(), b"not json"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_body_read_failure_after_2xx() {
        let mut partial = exchange(200, b"{\"ite");
        partial.error = Some(TransportError::new(TransportErrorKind::Io, "connection reset"));
        assert!(matches!(
            interpret::<Bytes>(partial, None),
            Err(Error::Transport(_))
        ));
    }
}
