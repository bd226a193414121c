use crate::error::TransportError;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::BodyExt;

/// Type alias for the boxed response body produced by the transport stack.
///
/// The body has already passed the decompression layer, so it yields
/// decompressed bytes if the server sent compressed data.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A fully buffered HTTP response.
///
/// Returned by [`Connection::request`](crate::Connection::request) for every
/// status in 200..=599 that is not followed as a redirect. Status handling is
/// left to the caller: a 4xx or 5xx is a response, not an error.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a single header value by (case-insensitive) name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// The `Location` header, if present and valid UTF-8
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Whether the status is one of the redirect codes that are followed
    /// (301, 302, 303, 307)
    #[must_use]
    pub fn is_followed_redirect(&self) -> bool {
        is_followed_redirect(self.status)
    }

    /// The raw (decompressed) body
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text (UTF-8)
    ///
    /// Invalid UTF-8 sequences are replaced with the Unicode replacement character.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Consume the response and return its parts
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// Redirect codes followed by the connection: 301, 302, 303 and 307.
///
/// 308 is not among them and is returned to the caller like any other status.
#[must_use]
pub fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
    )
}

/// Buffer a response, enforcing the byte limit on decompressed data.
///
/// Body stream errors are transport faults and map to
/// [`TransportError::ConnectionFailed`].
pub async fn read_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<HttpResponse, TransportError> {
    let (parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(TransportError::ConnectionFailed)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(TransportError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(HttpResponse::new(
        parts.status,
        parts.headers,
        Bytes::from(collected),
    ))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn boxed(body: &'static [u8]) -> ResponseBody {
        Full::new(Bytes::from_static(body))
            .map_err(|never| match never {})
            .boxed()
    }

    fn response(status: u16, body: &'static [u8]) -> Response<ResponseBody> {
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(boxed(body))
            .unwrap()
    }

    #[test]
    fn test_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/next"));
        headers.insert("X-Trace", HeaderValue::from_static("abc"));
        let resp = HttpResponse::new(StatusCode::FOUND, headers, Bytes::from_static(b"moved"));

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.location(), Some("/next"));
        assert_eq!(resp.header("x-trace").unwrap(), "abc");
        assert!(resp.header("missing").is_none());
        assert_eq!(resp.text(), "moved");
        assert!(resp.is_followed_redirect());

        let (status, headers, body) = resp.into_parts();
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(headers.len(), 2);
        assert_eq!(&body[..], b"moved");
    }

    #[test]
    fn test_text_replaces_invalid_utf8() {
        let resp = HttpResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(&[0x66, 0x6f, 0xff]),
        );
        assert_eq!(resp.text(), "fo\u{fffd}");
    }

    #[test]
    fn test_followed_redirect_codes() {
        for code in [301, 302, 303, 307] {
            assert!(is_followed_redirect(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [200, 300, 304, 305, 308, 404, 500] {
            assert!(!is_followed_redirect(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[tokio::test]
    async fn test_read_limited_within_limit() {
        let resp = read_limited(response(200, br#"{"access_token":"t"}"#), 1024)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.header("content-type").unwrap(), "application/json");
        assert_eq!(resp.text(), r#"{"access_token":"t"}"#);
    }

    #[tokio::test]
    async fn test_read_limited_exact_limit() {
        let resp = read_limited(response(200, b"12345"), 5).await.unwrap();
        assert_eq!(resp.body().len(), 5);
    }

    #[tokio::test]
    async fn test_read_limited_too_large() {
        let err = read_limited(response(200, b"123456"), 5).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::BodyTooLarge {
                limit: 5,
                actual: 6
            }
        ));
    }

    #[tokio::test]
    async fn test_read_limited_empty_body() {
        let resp = read_limited(response(204, b""), 0).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.body().is_empty());
    }
}
