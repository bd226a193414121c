use crate::endpoint::{Endpoint, Scheme};
use crate::error::TransportError;
use crate::tls::CertStore;
use http::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Deserializer, de};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default User-Agent string sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("oauth2-transport/", env!("CARGO_PKG_VERSION"));

/// Default `Accept` header value
pub const DEFAULT_ACCEPT: &str = "application/json";

/// Content type used when params are sent as a POST/PUT body
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Default cap on followed redirects within one request chain
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Default per-call timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on buffered response body bytes (10 MiB, after decompression)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// The fixed default header set: `Accept: application/json` and the crate User-Agent.
#[must_use]
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers
}

/// Pinned TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = TransportError;

    /// Accepts `TLSv1_2`, `TLSv1.2`, `tls1.2`, `1.2` and the 1.3 equivalents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', ".");
        let number = normalized
            .strip_prefix("tlsv")
            .or_else(|| normalized.strip_prefix("tls"))
            .unwrap_or(&normalized);

        match number {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TransportError::configuration(format!(
                "unsupported TLS version '{s}' (supported: TLSv1_2, TLSv1_3)"
            ))),
        }
    }
}

impl TryFrom<String> for TlsVersion {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// TLS options applied to https requests.
///
/// Every field is optional; absent fields keep their defaults (peer
/// verification on, system trust store, rustls default protocol versions).
/// File paths point at PEM files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslOptions {
    /// Verify the server certificate chain (default: true)
    pub verify: Option<bool>,

    /// Client certificate chain for mutual TLS; requires `client_key`
    pub client_cert: Option<PathBuf>,

    /// Private key matching `client_cert`
    pub client_key: Option<PathBuf>,

    /// Additional trusted CA certificates (single PEM file)
    pub ca_file: Option<PathBuf>,

    /// Directory of PEM files with additional trusted CA certificates
    pub ca_path: Option<PathBuf>,

    /// Maximum number of intermediate certificates accepted in the server chain
    ///
    /// Counted over every certificate the server presents after its leaf,
    /// so a server that also sends its root (or unrelated extras) needs a
    /// larger value than the length of the verified path.
    pub verify_depth: Option<usize>,

    /// Pin the TLS protocol version
    pub version: Option<TlsVersion>,

    /// Trust store replacing the system default
    #[serde(skip)]
    pub cert_store: Option<CertStore>,
}

impl SslOptions {
    /// Whether the server certificate is verified (`verify`, default true)
    #[must_use]
    pub fn verify_peer(&self) -> bool {
        self.verify.unwrap_or(true)
    }

    /// Overlay `other` on top of `self`: fields set in `other` win.
    #[must_use]
    pub fn merge(self, other: SslOptions) -> SslOptions {
        SslOptions {
            verify: other.verify.or(self.verify),
            client_cert: other.client_cert.or(self.client_cert),
            client_key: other.client_key.or(self.client_key),
            ca_file: other.ca_file.or(self.ca_file),
            ca_path: other.ca_path.or(self.ca_path),
            verify_depth: other.verify_depth.or(self.verify_depth),
            version: other.version.or(self.version),
            cert_store: other.cert_store.or(self.cert_store),
        }
    }
}

/// Options recognized by [`Connection::new`](crate::Connection::new).
///
/// Unset fields fall back to the documented defaults. A supplied `headers`
/// map replaces the default header set as a whole.
///
/// Can be deserialized from a dynamic configuration value, see
/// [`ConnectionOptions::from_value`]. `request_timeout` uses humantime
/// notation there (`"30s"`, `"1m 30s"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionOptions {
    /// Default headers sent with every request
    pub headers: Option<BTreeMap<String, String>>,

    /// TLS options
    pub ssl: Option<SslOptions>,

    /// Redirect budget per request chain (default: 5)
    pub max_redirects: Option<usize>,

    /// Per-call timeout (default: 30s)
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub request_timeout: Option<Duration>,

    /// Cap on buffered response body bytes (default: 10 MiB)
    pub max_body_size: Option<usize>,
}

impl ConnectionOptions {
    /// Parse options from a dynamic key-value mapping.
    ///
    /// # Errors
    /// Returns [`TransportError::Configuration`] if `value` is not a mapping,
    /// if `ssl` is present but not a mapping, or if any recognized key has the
    /// wrong shape. Unknown keys, top-level or under `ssl`, are ignored.
    pub fn from_value(value: serde_json::Value) -> Result<Self, TransportError> {
        if !value.is_object() {
            return Err(TransportError::configuration(format!(
                "expected a mapping of connection options but got {}",
                json_kind(&value)
            )));
        }
        if let Some(ssl) = value.get("ssl")
            && !ssl.is_object()
        {
            return Err(TransportError::configuration(format!(
                "expected ssl options to be a mapping but got {}",
                json_kind(ssl)
            )));
        }

        log_ignored_keys(&value, CONNECTION_KEYS, "connection");
        if let Some(ssl) = value.get("ssl") {
            log_ignored_keys(ssl, SSL_KEYS, "ssl");
        }

        serde_json::from_value(value).map_err(|e| TransportError::configuration(e.to_string()))
    }

    /// Default headers with any configured override applied.
    pub(crate) fn resolved_headers(&self) -> Result<HeaderMap, TransportError> {
        let Some(configured) = &self.headers else {
            return Ok(default_headers());
        };

        let mut headers = HeaderMap::with_capacity(configured.len());
        for (name, value) in configured {
            headers.insert(
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            );
        }
        Ok(headers)
    }
}

const CONNECTION_KEYS: &[&str] = &[
    "headers",
    "ssl",
    "max_redirects",
    "request_timeout",
    "max_body_size",
];

const SSL_KEYS: &[&str] = &[
    "verify",
    "client_cert",
    "client_key",
    "ca_file",
    "ca_path",
    "verify_depth",
    "version",
];

fn log_ignored_keys(value: &serde_json::Value, known: &[&str], section: &str) {
    let Some(map) = value.as_object() else {
        return;
    };
    for key in map.keys().filter(|k| !known.contains(&k.as_str())) {
        tracing::debug!(section, key = %key, "ignoring unrecognized option");
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "a mapping",
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| humantime::parse_duration(&raw).map_err(de::Error::custom))
        .transpose()
}

/// Ordered request params, encoded as `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value pair
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Form-encode the params (`a=1+2&b=x`). Empty params encode to `""`.
    ///
    /// # Errors
    /// Returns [`TransportError::FormEncode`] if encoding fails.
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_urlencoded::to_string(&self.0)?)
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Per-call override of the target endpoint.
///
/// Fields left `None` fall back to the connection's own scheme, host and port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    pub scheme: Option<Scheme>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ConnectionOverrides {
    /// Overrides pointing every field at `endpoint`
    #[must_use]
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            scheme: Some(endpoint.scheme),
            host: Some(endpoint.host.clone()),
            port: Some(endpoint.port),
        }
    }
}

/// Per-request options for [`Connection::request`](crate::Connection::request).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query params (GET/DELETE) or form body (POST/PUT)
    pub params: Params,
    /// Headers merged over the connection defaults; these win
    pub headers: HeaderMap,
    /// Target override for this call
    pub connection_options: ConnectionOverrides,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params = self.params.with(key, value);
        self
    }

    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Add a header.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidHeaderName`] or
    /// [`TransportError::InvalidHeaderValue`] for malformed input.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, TransportError> {
        self.headers
            .insert(HeaderName::try_from(name)?, HeaderValue::try_from(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn connection_options(mut self, overrides: ConnectionOverrides) -> Self {
        self.connection_options = overrides;
        self
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_headers() {
        let headers = default_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[ACCEPT], "application/json");
        assert_eq!(headers[USER_AGENT], DEFAULT_USER_AGENT);
        assert!(DEFAULT_USER_AGENT.starts_with("oauth2-transport/"));
    }

    #[test]
    fn test_tls_version_parse() {
        for (raw, expected) in [
            ("TLSv1_2", TlsVersion::Tls12),
            ("TLSv1.2", TlsVersion::Tls12),
            ("tls1.2", TlsVersion::Tls12),
            ("1.2", TlsVersion::Tls12),
            ("TLSv1_3", TlsVersion::Tls13),
            (" tlsv1.3 ", TlsVersion::Tls13),
        ] {
            assert_eq!(raw.parse::<TlsVersion>().unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn test_tls_version_rejects_legacy() {
        for raw in ["SSLv3", "TLSv1", "TLSv1_1", "2.0", ""] {
            assert!(
                matches!(
                    raw.parse::<TlsVersion>(),
                    Err(TransportError::Configuration { .. })
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_ssl_options_default_verifies() {
        let ssl = SslOptions::default();
        assert!(ssl.verify_peer());
        assert!(ssl.cert_store.is_none());
    }

    #[test]
    fn test_ssl_options_merge_prefers_new_values() {
        let current = SslOptions {
            verify: Some(true),
            ca_file: Some("/etc/ssl/a.pem".into()),
            verify_depth: Some(3),
            ..Default::default()
        };
        let update = SslOptions {
            verify: Some(false),
            ca_path: Some("/etc/ssl/certs".into()),
            ..Default::default()
        };

        let merged = current.merge(update);
        assert_eq!(merged.verify, Some(false));
        assert_eq!(merged.ca_file, Some("/etc/ssl/a.pem".into()));
        assert_eq!(merged.ca_path, Some("/etc/ssl/certs".into()));
        assert_eq!(merged.verify_depth, Some(3));
    }

    #[test]
    fn test_from_value_full() {
        let options = ConnectionOptions::from_value(json!({
            "headers": {"Accept": "application/xml"},
            "ssl": {"verify": false, "version": "TLSv1_2", "verify_depth": 2},
            "max_redirects": 2,
            "request_timeout": "1m 30s",
            "max_body_size": 4096
        }))
        .unwrap();

        assert_eq!(options.max_redirects, Some(2));
        assert_eq!(options.request_timeout, Some(Duration::from_secs(90)));
        assert_eq!(options.max_body_size, Some(4096));
        let ssl = options.ssl.unwrap();
        assert!(!ssl.verify_peer());
        assert_eq!(ssl.version, Some(TlsVersion::Tls12));
        assert_eq!(ssl.verify_depth, Some(2));
    }

    #[test]
    fn test_from_value_empty_mapping_uses_defaults() {
        let options = ConnectionOptions::from_value(json!({})).unwrap();
        assert!(options.headers.is_none());
        assert!(options.ssl.is_none());
        assert!(options.max_redirects.is_none());
        assert_eq!(options.resolved_headers().unwrap(), default_headers());
    }

    #[test]
    fn test_from_value_ssl_not_a_mapping() {
        let err = ConnectionOptions::from_value(json!({"ssl": "not-a-mapping"})).unwrap_err();
        match err {
            TransportError::Configuration { reason } => {
                assert!(reason.contains("a string"), "unexpected reason: {reason}");
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }

        assert!(matches!(
            ConnectionOptions::from_value(json!({"ssl": [true]})),
            Err(TransportError::Configuration { .. })
        ));
    }

    #[test]
    fn test_from_value_not_a_mapping() {
        assert!(matches!(
            ConnectionOptions::from_value(json!("headers")),
            Err(TransportError::Configuration { .. })
        ));
    }

    #[test]
    fn test_from_value_wrong_shapes() {
        for value in [
            json!({"max_redirects": "five"}),
            json!({"headers": ["Accept"]}),
            json!({"ssl": {"verify": "yes"}}),
            json!({"ssl": {"version": "SSLv3"}}),
            json!({"request_timeout": "soon"}),
        ] {
            assert!(
                matches!(
                    ConnectionOptions::from_value(value.clone()),
                    Err(TransportError::Configuration { .. })
                ),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_value_ignores_unknown_keys() {
        let options = ConnectionOptions::from_value(json!({
            "max_redirects": 2,
            "timeout": 5,
            "proxy": "http://proxy",
            "ssl": {"verify": true, "verify_mode": 1, "unknown": 1}
        }))
        .unwrap();

        assert_eq!(options.max_redirects, Some(2));
        assert!(options.request_timeout.is_none());
        assert!(options.ssl.unwrap().verify_peer());
    }

    #[test]
    fn test_resolved_headers_replace_defaults() {
        let options = ConnectionOptions {
            headers: Some(BTreeMap::from([(
                "X-Client".to_owned(),
                "test".to_owned(),
            )])),
            ..Default::default()
        };
        let headers = options.resolved_headers().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-client"], "test");
    }

    #[test]
    fn test_resolved_headers_invalid_name() {
        let options = ConnectionOptions {
            headers: Some(BTreeMap::from([(
                "bad header".to_owned(),
                "x".to_owned(),
            )])),
            ..Default::default()
        };
        assert!(matches!(
            options.resolved_headers(),
            Err(TransportError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn test_params_encode() {
        let params = Params::new().with("a", "1 2").with("b", "x&y=z");
        assert_eq!(params.encode().unwrap(), "a=1+2&b=x%26y%3Dz");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_params_encode_preserves_order() {
        let params: Params = [("z", "1"), ("a", "2")].into_iter().collect();
        assert_eq!(params.encode().unwrap(), "z=1&a=2");
    }

    #[test]
    fn test_params_empty() {
        let params = Params::new();
        assert!(params.is_empty());
        assert_eq!(params.encode().unwrap(), "");
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .param("grant_type", "refresh_token")
            .header("Authorization", "Basic abc")
            .unwrap();
        assert_eq!(options.params.len(), 1);
        assert_eq!(options.headers["authorization"], "Basic abc");

        assert!(RequestOptions::new().header("x", "bad\nvalue").is_err());
    }

    #[test]
    fn test_overrides_for_endpoint() {
        let endpoint = Endpoint::new(Scheme::Https, "auth.example.com", 8443);
        let overrides = ConnectionOverrides::for_endpoint(&endpoint);
        assert_eq!(overrides.scheme, Some(Scheme::Https));
        assert_eq!(overrides.host.as_deref(), Some("auth.example.com"));
        assert_eq!(overrides.port, Some(8443));
    }
}
