//! Endpoint identity: the scheme, host and port a request is sent to.

use crate::error::TransportError;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// URL scheme accepted by the transport.
///
/// The set is closed: parsing any other value fails with
/// [`TransportError::UnsupportedScheme`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Port used when a URL does not name one explicitly
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// Whether TLS must be configured for this scheme
    #[must_use]
    pub const fn is_tls(self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl FromStr for Scheme {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(TransportError::UnsupportedScheme {
                scheme: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete request target: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Derive the endpoint of an absolute URL.
    ///
    /// # Errors
    /// - [`TransportError::UnsupportedScheme`] if the scheme is not http/https
    /// - [`TransportError::InvalidUri`] if the URL has no host
    pub fn from_url(url: &Url) -> Result<Self, TransportError> {
        let scheme: Scheme = url.scheme().parse()?;
        let host = url.host_str().ok_or_else(|| TransportError::InvalidUri {
            url: url.to_string(),
            reason: "missing host".to_owned(),
        })?;
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Self::new(scheme, host, port))
    }

    /// `host[:port]`, with the port omitted when it is the scheme default.
    ///
    /// Bare IPv6 literals are bracketed.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `scheme://authority`
    #[must_use]
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    /// Build the absolute request URI for a path (with optional query).
    pub(crate) fn uri_for(&self, path_and_query: &str) -> Result<http::Uri, TransportError> {
        let url = if path_and_query.starts_with('/') {
            format!("{}{path_and_query}", self.origin())
        } else {
            format!("{}/{path_and_query}", self.origin())
        };

        url.parse::<http::Uri>()
            .map_err(|e| TransportError::InvalidUri {
                url,
                reason: e.to_string(),
            })
    }

    /// Resolve a `Location` header value against the request that produced it.
    ///
    /// Absolute, scheme-relative and relative references are accepted.
    /// Returns the new endpoint and the path to request there. The query and
    /// fragment of the location are dropped; the follow-up re-encodes the
    /// request params itself.
    pub(crate) fn resolve(
        &self,
        current_path: &str,
        location: &str,
    ) -> Result<(Endpoint, String), TransportError> {
        let base = Url::parse(&self.uri_for(current_path)?.to_string()).map_err(|e| {
            TransportError::InvalidUri {
                url: current_path.to_owned(),
                reason: e.to_string(),
            }
        })?;

        let target = base
            .join(location)
            .map_err(|e| TransportError::InvalidUri {
                url: location.to_owned(),
                reason: e.to_string(),
            })?;

        let endpoint = Endpoint::from_url(&target)?;
        Ok((endpoint, target.path().to_owned()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn endpoint(s: &str) -> Endpoint {
        Endpoint::from_url(&Url::parse(s).unwrap()).unwrap()
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("http".parse::<Scheme>().unwrap(), Scheme::Http);
        assert_eq!("https".parse::<Scheme>().unwrap(), Scheme::Https);
    }

    #[test]
    fn test_scheme_parse_rejects_others() {
        for value in ["ftp", "HTTP", "Https", "ws", "", "file"] {
            let err = value.parse::<Scheme>().unwrap_err();
            assert!(
                matches!(err, TransportError::UnsupportedScheme { ref scheme } if scheme == value),
                "{value:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Scheme::Http.default_port(), 80);
        assert_eq!(Scheme::Https.default_port(), 443);
        assert!(Scheme::Https.is_tls());
        assert!(!Scheme::Http.is_tls());
    }

    #[test]
    fn test_from_url_default_port() {
        let ep = endpoint("https://auth.example.com/oauth2");
        assert_eq!(ep, Endpoint::new(Scheme::Https, "auth.example.com", 443));

        let ep = endpoint("http://auth.example.com");
        assert_eq!(ep.port, 80);
    }

    #[test]
    fn test_from_url_explicit_port() {
        let ep = endpoint("http://localhost:8080/token");
        assert_eq!(ep, Endpoint::new(Scheme::Http, "localhost", 8080));
        assert_eq!(ep.authority(), "localhost:8080");
    }

    #[test]
    fn test_from_url_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert!(matches!(
            Endpoint::from_url(&url),
            Err(TransportError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_authority_omits_default_port() {
        let ep = Endpoint::new(Scheme::Https, "example.com", 443);
        assert_eq!(ep.authority(), "example.com");
        assert_eq!(ep.origin(), "https://example.com");

        let ep = Endpoint::new(Scheme::Https, "example.com", 80);
        assert_eq!(ep.authority(), "example.com:80");
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        let ep = Endpoint::new(Scheme::Http, "::1", 8080);
        assert_eq!(ep.authority(), "[::1]:8080");

        let ep = endpoint("http://[::1]:9000/");
        assert_eq!(ep.authority(), "[::1]:9000");
    }

    #[test]
    fn test_uri_for() {
        let ep = Endpoint::new(Scheme::Http, "127.0.0.1", 3000);
        let uri = ep.uri_for("/resource?a=1+2").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/resource?a=1+2");

        let uri = ep.uri_for("").unwrap();
        assert_eq!(uri.path(), "/");
    }

    #[test]
    fn test_resolve_absolute_location() {
        let ep = Endpoint::new(Scheme::Http, "a.example.com", 80);
        let (target, path) = ep
            .resolve("/start", "https://b.example.com:8443/next?x=1#frag")
            .unwrap();
        assert_eq!(target, Endpoint::new(Scheme::Https, "b.example.com", 8443));
        assert_eq!(path, "/next");
    }

    #[test]
    fn test_resolve_relative_location() {
        let ep = Endpoint::new(Scheme::Http, "127.0.0.1", 3000);

        let (target, path) = ep.resolve("/a/b", "/moved").unwrap();
        assert_eq!(target, ep);
        assert_eq!(path, "/moved");

        let (target, path) = ep.resolve("/a/b?q=1", "c").unwrap();
        assert_eq!(target, ep);
        assert_eq!(path, "/a/c");
    }

    #[test]
    fn test_resolve_drops_location_query() {
        let ep = Endpoint::new(Scheme::Http, "127.0.0.1", 3000);
        let (_, path) = ep
            .resolve("/authorize?client_id=app", "/login?client_id=app")
            .unwrap();
        assert_eq!(path, "/login");
    }

    #[test]
    fn test_resolve_scheme_relative_location() {
        let ep = Endpoint::new(Scheme::Https, "a.example.com", 443);
        let (target, path) = ep.resolve("/", "//b.example.com/x").unwrap();
        assert_eq!(target, Endpoint::new(Scheme::Https, "b.example.com", 443));
        assert_eq!(path, "/x");
    }

    #[test]
    fn test_resolve_rejects_unsupported_scheme() {
        let ep = Endpoint::new(Scheme::Https, "a.example.com", 443);
        assert!(matches!(
            ep.resolve("/", "ftp://files.example.com/x"),
            Err(TransportError::UnsupportedScheme { .. })
        ));
    }
}
