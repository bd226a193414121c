//! The connection manager.
//!
//! A [`Connection`] owns one endpoint plus its request policy (default headers,
//! TLS options, redirect budget) and executes requests against it, following
//! 301/302/303/307 redirects itself.
//!
//! The redirect counter lives inside each [`Connection::request`] call. Every
//! top-level call starts with the full budget, so a shared connection needs no
//! locking and an earlier chain never affects a later one.

use crate::config::{
    ConnectionOptions, ConnectionOverrides, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_REDIRECTS,
    DEFAULT_REQUEST_TIMEOUT, FORM_CONTENT_TYPE, Params, RequestOptions, SslOptions,
};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::TransportError;
use crate::response::{HttpResponse, is_followed_redirect};
use crate::tls::TlsSettings;
use crate::transport::Transport;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Request, StatusCode};
use http_body_util::Full;
use std::time::Duration;
use url::Url;

/// What to do with a received status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusAction {
    /// 301, 302, 303, 307: follow if the budget allows
    Redirect,
    /// Any other status in 200..=599
    Return,
    /// Everything else
    Reject,
}

fn classify(status: StatusCode) -> StatusAction {
    if is_followed_redirect(status) {
        StatusAction::Redirect
    } else if (200..=599).contains(&status.as_u16()) {
        StatusAction::Return
    } else {
        StatusAction::Reject
    }
}

/// Parse a request method case-insensitively.
///
/// Only GET, POST, PUT and DELETE are dispatched.
fn parse_method(method: &str) -> Result<http::Method, TransportError> {
    match method.to_ascii_lowercase().as_str() {
        "get" => Ok(http::Method::GET),
        "post" => Ok(http::Method::POST),
        "put" => Ok(http::Method::PUT),
        "delete" => Ok(http::Method::DELETE),
        _ => Err(TransportError::UnsupportedMethod {
            method: method.to_owned(),
        }),
    }
}

/// Append an encoded query to a path, joining with `&` when the path already
/// carries one.
fn append_query(path: &str, query: &str) -> String {
    if query.is_empty() {
        path.to_owned()
    } else if path.contains('?') {
        format!("{path}&{query}")
    } else {
        format!("{path}?{query}")
    }
}

/// An HTTP connection to one OAuth2 endpoint.
///
/// Built once and reused for many requests, including concurrently:
/// `Connection` is `Send + Sync` and [`request`](Self::request) takes `&self`.
#[derive(Debug)]
pub struct Connection {
    uri: Url,
    endpoint: Endpoint,
    headers: HeaderMap,
    ssl: SslOptions,
    tls: TlsSettings,
    max_redirects: usize,
    request_timeout: Duration,
    max_body_size: usize,
}

impl Connection {
    /// Create a connection for the base URL `url`.
    ///
    /// The port defaults to the scheme's default when the URL names none.
    /// TLS material referenced by `options.ssl` is read here.
    ///
    /// # Errors
    /// - [`TransportError::InvalidUri`] if `url` does not parse or has no host
    /// - [`TransportError::UnsupportedScheme`] if the scheme is not http/https
    /// - [`TransportError::Configuration`] for unusable TLS material
    /// - [`TransportError::InvalidHeaderName`] / [`TransportError::InvalidHeaderValue`]
    ///   for malformed configured headers
    pub fn new(url: &str, options: ConnectionOptions) -> Result<Self, TransportError> {
        let uri = Url::parse(url).map_err(|e| TransportError::InvalidUri {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let endpoint = Endpoint::from_url(&uri)?;
        let headers = options.resolved_headers()?;
        let ssl = options.ssl.unwrap_or_default();
        let tls = TlsSettings::load(&ssl)?;
        let max_redirects = options.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS);

        tracing::debug!(endpoint = %endpoint, max_redirects, "created OAuth2 connection");

        Ok(Self {
            uri,
            endpoint,
            headers,
            ssl,
            tls,
            max_redirects,
            request_timeout: options.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_body_size: options.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
        })
    }

    /// Create a connection from a dynamic option mapping.
    ///
    /// # Errors
    /// Returns [`TransportError::Configuration`] if `options` is not a mapping,
    /// if `ssl` is present but not a mapping, or if a recognized key has the
    /// wrong shape; otherwise the errors of [`Connection::new`].
    pub fn from_value(url: &str, options: serde_json::Value) -> Result<Self, TransportError> {
        Self::new(url, ConnectionOptions::from_value(options)?)
    }

    /// The built-in default header set (`Accept` and `User-Agent`).
    #[must_use]
    pub fn default_headers() -> HeaderMap {
        crate::config::default_headers()
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.endpoint.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Headers sent with every request
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn ssl(&self) -> &SslOptions {
        &self.ssl
    }

    #[must_use]
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Set the scheme.
    ///
    /// # Errors
    /// Returns [`TransportError::UnsupportedScheme`] unless `scheme` is exactly
    /// `"http"` or `"https"`; the current scheme is kept in that case.
    pub fn set_scheme(&mut self, scheme: &str) -> Result<(), TransportError> {
        self.endpoint.scheme = scheme.parse()?;
        Ok(())
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.endpoint.host = host.into();
    }

    pub fn set_port(&mut self, port: u16) {
        self.endpoint.port = port;
    }

    pub fn set_max_redirects(&mut self, max_redirects: usize) {
        self.max_redirects = max_redirects;
    }

    /// Merge `ssl` over the current TLS options and reload TLS material.
    ///
    /// Fields set in `ssl` win. On error nothing changes.
    ///
    /// # Errors
    /// Returns [`TransportError::Configuration`] if the merged options
    /// reference unusable TLS material.
    pub fn set_ssl(&mut self, ssl: SslOptions) -> Result<(), TransportError> {
        let merged = self.ssl.clone().merge(ssl);
        let tls = TlsSettings::load(&merged)?;
        self.ssl = merged;
        self.tls = tls;
        Ok(())
    }

    /// `scheme://host` followed by `path`.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}://{}{path}", self.endpoint.scheme, self.endpoint.host)
    }

    /// Issue a request and follow redirects.
    ///
    /// `method` is matched case-insensitively against GET, POST, PUT and
    /// DELETE. Params go into the query string for GET/DELETE and into a
    /// form-encoded body for POST/PUT. Headers from `options` win over the
    /// connection defaults.
    ///
    /// 301, 302, 303 and 307 responses are followed up to
    /// [`max_redirects`](Self::max_redirects) times; a 303 switches to GET and
    /// drops the params. The follow-up requests the path of `Location`; any
    /// query it carries is dropped and the params are encoded again. Once the
    /// budget is spent, or when a redirect carries no `Location`, the redirect
    /// response itself is returned.
    ///
    /// # Errors
    /// - [`TransportError::UnsupportedMethod`] before any network activity
    /// - [`TransportError::UnexpectedStatus`] for a status outside 200..=599
    /// - [`TransportError::ConnectionFailed`] for any transport fault
    /// - [`TransportError::UnsupportedScheme`] / [`TransportError::InvalidUri`]
    ///   for an unusable redirect target
    /// - [`TransportError::BodyTooLarge`] if a body exceeds `max_body_size`
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let mut method = parse_method(method)?;
        let mut headers = self.merged_headers(&method, options.headers);
        let mut target = self.target(options.connection_options);
        let mut params = options.params;
        let mut path = path.to_owned();
        let mut redirects = 0usize;

        loop {
            let response = self
                .dispatch(&method, &target, &path, &params, &headers)
                .await?;
            let status = response.status();

            match classify(status) {
                StatusAction::Return => return Ok(response),
                StatusAction::Reject => {
                    return Err(TransportError::UnexpectedStatus {
                        status: status.as_u16(),
                    });
                }
                StatusAction::Redirect => {}
            }

            redirects += 1;
            if redirects > self.max_redirects {
                tracing::warn!(
                    status = status.as_u16(),
                    max_redirects = self.max_redirects,
                    location = response.location().unwrap_or_default(),
                    "redirect limit reached, returning redirect response"
                );
                return Ok(response);
            }

            let Some(location) = response.location() else {
                tracing::warn!(
                    status = status.as_u16(),
                    url = %target.origin(),
                    path = %path,
                    "redirect response without a usable Location header"
                );
                return Ok(response);
            };

            let (next_target, next_path) = target.resolve(&path, location)?;

            if status == StatusCode::SEE_OTHER {
                method = http::Method::GET;
                params = Params::new();
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }

            tracing::debug!(
                status = status.as_u16(),
                from = %format_args!("{target}{path}"),
                to = %format_args!("{next_target}{next_path}"),
                redirect = redirects,
                "following redirect"
            );

            target = self.target(ConnectionOverrides::for_endpoint(&next_target));
            path = next_path;
        }
    }

    /// `GET path`
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request("GET", path, options).await
    }

    /// `POST path` with params as a form body
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request("POST", path, options).await
    }

    /// `PUT path` with params as a form body
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request("PUT", path, options).await
    }

    /// `DELETE path`
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.request("DELETE", path, options).await
    }

    /// Connection defaults overlaid with `extra`; POST and PUT get the form
    /// content type unless one is set.
    fn merged_headers(&self, method: &http::Method, extra: HeaderMap) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.extend(extra);
        if (method == http::Method::POST || method == http::Method::PUT)
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }
        headers
    }

    fn target(&self, overrides: ConnectionOverrides) -> Endpoint {
        Endpoint {
            scheme: overrides.scheme.unwrap_or(self.endpoint.scheme),
            host: overrides
                .host
                .unwrap_or_else(|| self.endpoint.host.clone()),
            port: overrides.port.unwrap_or(self.endpoint.port),
        }
    }

    /// Issue exactly one HTTP call against `target`.
    async fn dispatch(
        &self,
        method: &http::Method,
        target: &Endpoint,
        path: &str,
        params: &Params,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, TransportError> {
        let query = params.encode()?;

        let (path_and_query, body) = if method == http::Method::POST || method == http::Method::PUT
        {
            (path.to_owned(), Bytes::from(query))
        } else {
            (append_query(path, &query), Bytes::new())
        };

        let uri = target.uri_for(&path_and_query)?;
        tracing::debug!(method = %method, uri = %uri, "sending request");

        let mut request = Request::new(Full::new(body));
        *request.method_mut() = method.clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = headers.clone();

        let transport = Transport::build(
            target.scheme,
            &self.tls,
            self.request_timeout,
            self.max_body_size,
        )?;
        let response = transport.send(request).await?;

        tracing::debug!(
            status = response.status().as_u16(),
            "received response"
        );
        Ok(response)
    }
}
