//! Address string parsing for connect calls.
//!
//! Accepts the `[protocol://]host[:port][/path]` shape used throughout the
//! crate. Port resolution for connecting follows [`UrlParser::service`]:
//! explicit port first, then the protocol name, then `"80"`.

use crate::error::{ErrorCode, ErrorInfo, Result};

/// Parsed pieces of an address string.
///
/// # Example
///
/// ```
/// use wiremux::UrlParser;
///
/// let url = UrlParser::parse("http://example.com:8080/status").unwrap();
/// assert_eq!(url.protocol(), "http");
/// assert_eq!(url.host(), "example.com");
/// assert_eq!(url.port(), "8080");
/// assert_eq!(url.path(), "/status");
/// assert_eq!(url.service(), "8080");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParser {
    protocol: String,
    host: String,
    port: String,
    path: String,
}

impl UrlParser {
    /// Parse an address of the form `[protocol://]host[:port][/path]`.
    pub fn parse(url: &str) -> Result<Self> {
        let malformed = || {
            ErrorInfo::new(ErrorCode::Parameter)
                .with_message("malformed address")
                .add_pair("url", url)
        };

        let (protocol, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                if scheme.is_empty() || !scheme.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(malformed());
                }
                (scheme.to_string(), rest)
            }
            None => (String::new(), url),
        };

        let host_end = rest
            .find(|c| c == ':' || c == '/')
            .unwrap_or(rest.len());
        let host = &rest[..host_end];
        if host.is_empty() {
            return Err(malformed());
        }

        let mut remainder = &rest[host_end..];
        let mut port = "";
        if let Some(stripped) = remainder.strip_prefix(':') {
            let digits_end = stripped
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(stripped.len());
            port = &stripped[..digits_end];
            remainder = &stripped[digits_end..];
        }

        // Anything left must be a path; a stray suffix like ":abc" is rejected.
        if !remainder.is_empty() && !remainder.starts_with('/') {
            return Err(malformed());
        }

        Ok(Self {
            protocol,
            host: host.to_string(),
            port: port.to_string(),
            path: remainder.to_string(),
        })
    }

    /// The protocol piece, or `""` if none was given.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The host piece.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The raw port piece, or `""` if none was given.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The path piece; defaults to `"/"`.
    pub fn path(&self) -> &str {
        if self.path.is_empty() {
            "/"
        } else {
            &self.path
        }
    }

    /// Service used for resolution: port if present, else protocol, else `"80"`.
    pub fn service(&self) -> &str {
        if !self.port.is_empty() {
            &self.port
        } else if !self.protocol.is_empty() {
            &self.protocol
        } else {
            "80"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip() {
        let url = UrlParser::parse("127.0.0.1").unwrap();
        assert_eq!(url.protocol(), "");
        assert_eq!(url.host(), "127.0.0.1");
        assert_eq!(url.port(), "");
        assert_eq!(url.path(), "/");
        assert_eq!(url.service(), "80");
    }

    #[test]
    fn test_ip_port() {
        let url = UrlParser::parse("127.0.0.1:45678").unwrap();
        assert_eq!(url.protocol(), "");
        assert_eq!(url.host(), "127.0.0.1");
        assert_eq!(url.port(), "45678");
        assert_eq!(url.path(), "/");
        assert_eq!(url.service(), "45678");
    }

    #[test]
    fn test_ip_port_path() {
        let url = UrlParser::parse("127.0.0.1:45678/query?").unwrap();
        assert_eq!(url.protocol(), "");
        assert_eq!(url.host(), "127.0.0.1");
        assert_eq!(url.port(), "45678");
        assert_eq!(url.path(), "/query?");
        assert_eq!(url.service(), "45678");
    }

    #[test]
    fn test_http_ip() {
        let url = UrlParser::parse("http://127.0.0.1").unwrap();
        assert_eq!(url.protocol(), "http");
        assert_eq!(url.host(), "127.0.0.1");
        assert_eq!(url.port(), "");
        assert_eq!(url.path(), "/");
        assert_eq!(url.service(), "http");
    }

    #[test]
    fn test_http_ip_port_path() {
        let url = UrlParser::parse("https://example.com:8443/a/b?c=d").unwrap();
        assert_eq!(url.protocol(), "https");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.port(), "8443");
        assert_eq!(url.path(), "/a/b?c=d");
        assert_eq!(url.service(), "8443");
    }

    #[test]
    fn test_hostname_without_port() {
        let url = UrlParser::parse("db.internal/healthz").unwrap();
        assert_eq!(url.host(), "db.internal");
        assert_eq!(url.path(), "/healthz");
        assert_eq!(url.service(), "80");
    }

    #[test]
    fn test_empty_port_before_path() {
        // A colon with no digits falls through to the path.
        let url = UrlParser::parse("127.0.0.1:/x").unwrap();
        assert_eq!(url.port(), "");
        assert_eq!(url.path(), "/x");
        assert_eq!(url.service(), "80");
    }

    #[test]
    fn test_rejects_empty_input() {
        let err = UrlParser::parse("").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
    }

    #[test]
    fn test_rejects_non_numeric_port() {
        let err = UrlParser::parse("127.0.0.1:abc").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
        assert_eq!(
            err.values("url").collect::<Vec<_>>(),
            vec!["127.0.0.1:abc"]
        );
    }

    #[test]
    fn test_rejects_empty_scheme() {
        assert!(UrlParser::parse("://host").is_err());
    }
}
