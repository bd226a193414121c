//! The transport handle: a hyper client wrapped in tower middleware that issues
//! exactly one HTTP call and buffers the response.
//!
//! A handle is built for every hop of a request chain. Plain `http` targets get
//! an `HttpConnector`; `https` targets get an `HttpsConnector` carrying a
//! freshly built rustls config, so TLS is only ever configured for https.
//!
//! Layer stack (outer to inner):
//!   error mapping → `TimeoutLayer` → `DecompressionLayer` → hyper client
//!
//! No redirect layer is installed: 3xx responses come back to the connection,
//! which decides whether to follow them.

use crate::endpoint::Scheme;
use crate::error::TransportError;
use crate::response::{HttpResponse, ResponseBody, read_limited};
use crate::tls::TlsSettings;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type TransportService =
    BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, TransportError>;

/// Network client for a single HTTP call.
pub struct Transport {
    service: TransportService,
    max_body_size: usize,
}

impl Transport {
    /// Build a handle for `scheme`.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if the TLS client
    /// configuration cannot be built for an https target.
    pub(crate) fn build(
        scheme: Scheme,
        tls: &TlsSettings,
        timeout: Duration,
        max_body_size: usize,
    ) -> Result<Self, TransportError> {
        let service = match scheme {
            Scheme::Http => layered(HttpConnector::new(), timeout),
            Scheme::Https => layered(build_https_connector(tls)?, timeout),
        };

        Ok(Self {
            service,
            max_body_size,
        })
    }

    /// Dispatch `request` and buffer the whole response.
    ///
    /// Every status code is returned as a response; only transport faults and
    /// oversized bodies are errors.
    pub(crate) async fn send(
        self,
        request: Request<Full<Bytes>>,
    ) -> Result<HttpResponse, TransportError> {
        let response = self.service.oneshot(request).await?;
        read_limited(response, self.max_body_size).await
    }
}

fn layered<C>(connector: C, timeout: Duration) -> TransportService
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .layer(DecompressionLayer::new())
        .service(client);

    // Response<DecompressionBody<Incoming>> -> Response<ResponseBody>
    let service = service.map_response(map_decompression_response);

    let service = service.map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

    service.boxed_clone()
}

/// Map tower errors to [`TransportError::ConnectionFailed`].
///
/// An elapsed timeout becomes an `io::ErrorKind::TimedOut` cause naming the
/// configured duration; every other cause is kept as is.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> TransportError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return TransportError::connection_failed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!(
                "request timed out after {}",
                humantime::format_duration(timeout)
            ),
        ));
    }

    TransportError::ConnectionFailed(err)
}

fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// HTTPS-only connector carrying a fresh rustls config.
///
/// `enable_all_versions()` advertises both h2 and http/1.1 via ALPN; the
/// protocol is picked during the handshake.
fn build_https_connector(
    tls: &TlsSettings,
) -> Result<HttpsConnector<HttpConnector>, TransportError> {
    let client_config = tls.client_config()?;
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_only()
        .enable_all_versions()
        .build())
}
