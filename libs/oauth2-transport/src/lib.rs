#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for OAuth2 clients
//!
//! This crate provides the connection layer that grant-type implementations
//! call into:
//! - One [`Connection`] per authorization server endpoint, reusable across tasks
//! - GET/POST/PUT/DELETE with params sent as a query string or a form body
//! - Redirect following for 301, 302, 303 and 307 with a per-call budget
//! - TLS via rustls (peer verification, custom CA files, client certificates)
//! - **Transparent response decompression** (gzip, brotli, deflate)
//!
//! Every status in 200..=599 that is not followed comes back as an
//! [`HttpResponse`]; interpreting token payloads or OAuth2 error bodies is up to
//! the caller. Transport faults are reported as
//! [`TransportError::ConnectionFailed`] and never retried.
//!
//! # Example
//!
//! ```ignore
//! use oauth2_transport::{Connection, ConnectionOptions, RequestOptions};
//!
//! let conn = Connection::new("https://auth.example.com", ConnectionOptions::default())?;
//!
//! let resp = conn
//!     .post(
//!         "/oauth/token",
//!         RequestOptions::new()
//!             .param("grant_type", "refresh_token")
//!             .param("refresh_token", token),
//!     )
//!     .await?;
//!
//! println!("{} {}", resp.status(), resp.text());
//! ```

mod config;
mod connection;
mod endpoint;
mod error;
mod response;
mod tls;
mod transport;

pub use config::{
    ConnectionOptions, ConnectionOverrides, DEFAULT_ACCEPT, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_MAX_REDIRECTS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, FORM_CONTENT_TYPE, Params,
    RequestOptions, SslOptions, TlsVersion, default_headers,
};
pub use connection::Connection;
pub use endpoint::{Endpoint, Scheme};
pub use error::TransportError;
pub use response::HttpResponse;
pub use tls::CertStore;
