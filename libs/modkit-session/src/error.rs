use std::time::Duration;
use thiserror::Error;

/// Boxed error used for transport, TLS and decode sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL scheme is neither `http` nor `https`
    UnsupportedScheme,
}

/// Errors returned by a session transmission.
///
/// Every failure a transmission can return belongs to one of five classes:
/// configuration, timeout, redirect, transport and decode.
/// [`HttpError::is_timeout`] and friends give a stable way to branch on the
/// class. `HttpStatus` and `Io` only come from helpers that run after a
/// successful exchange (`error_for_status`, `download`) and sit outside them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Proxy URL is malformed or uses an unsupported scheme
    #[error("Invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    /// A request option received a value it cannot apply
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    /// The transmission deadline elapsed before the exchange completed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired before the deadline
    #[error("Request cancelled")]
    Cancelled,

    /// The redirect chain went past the configured budget
    #[error("Stopped after {budget} redirects")]
    RedirectLimit { budget: usize },

    /// Redirect refused by policy (an HTTPS to HTTP downgrade or a caller's
    /// redirect check)
    #[error("Redirect to '{location}' refused: {reason}")]
    RedirectRefused { location: String, reason: String },

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Reading or transcoding the response body failed
    #[error("Failed to build response: {0}")]
    Decode(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// Request body could not be serialized
    #[error("Failed to encode request body: {0}")]
    BodyEncode(#[source] BoxError),

    /// JSON parsing error on a response body
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// XML parsing error on a response body
    #[error("XML processing failed: {0}")]
    Xml(#[source] BoxError),

    /// Filesystem error while writing a download
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// `true` for errors raised before any network traffic, caused by the
    /// request or session configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::RequestBuild(_)
                | Self::InvalidHeaderName(_)
                | Self::InvalidHeaderValue(_)
                | Self::InvalidUri { .. }
                | Self::InvalidProxy { .. }
                | Self::InvalidOption { .. }
                | Self::BodyEncode(_)
                | Self::FormEncode(_)
        )
    }

    /// `true` when the transmission's deadline scope ended early: the
    /// deadline elapsed or the caller cancelled it.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }

    /// `true` when the redirect chain was stopped, either by the budget or by
    /// a refused hop.
    #[must_use]
    pub fn is_redirect_limit(&self) -> bool {
        matches!(
            self,
            Self::RedirectLimit { .. } | Self::RedirectRefused { .. }
        )
    }

    /// `true` for network-level failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Tls(_))
    }

    /// `true` when the response arrived but its body could not be read or
    /// parsed.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::BodyTooLarge { .. } | Self::Json(_) | Self::Xml(_)
        )
    }

    /// Rebuild a configuration error for a copied request.
    ///
    /// Header parse errors carry no public constructor, so they are carried
    /// over as `InvalidOption` with the original message.
    pub(crate) fn replay(&self) -> Self {
        match self {
            Self::InvalidUri { url, kind, reason } => Self::InvalidUri {
                url: url.clone(),
                kind: *kind,
                reason: reason.clone(),
            },
            Self::InvalidProxy { proxy, reason } => Self::InvalidProxy {
                proxy: proxy.clone(),
                reason: reason.clone(),
            },
            Self::InvalidOption { option, reason } => Self::InvalidOption {
                option,
                reason: reason.clone(),
            },
            other => Self::InvalidOption {
                option: "request",
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn xml(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Xml(Box::new(err))
    }

    pub(crate) fn body_encode(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::BodyEncode(Box::new(err))
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>();
        assert_eq!(downcast.unwrap().0, "connection refused");
        assert!(err.is_transport());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_decode_error_preserves_source() {
        let err = HttpError::Decode(Box::new(TestError("stream reset")));

        assert!(err.is_decode());
        assert!(err.to_string().starts_with("Failed to build response"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_classification_is_exclusive() {
        let errors = [
            HttpError::Timeout(Duration::from_millis(10)),
            HttpError::RedirectLimit { budget: 3 },
            HttpError::Transport(Box::new(TestError("x"))),
            HttpError::BodyTooLarge {
                limit: 1,
                actual: 2,
            },
            HttpError::InvalidOption {
                option: "header",
                reason: "bad".to_owned(),
            },
            HttpError::Cancelled,
            HttpError::RedirectRefused {
                location: "http://a.example/".to_owned(),
                reason: "HTTPS to HTTP downgrade".to_owned(),
            },
            HttpError::body_encode(serde_json::from_str::<u8>("x").unwrap_err()),
            HttpError::Json(serde_json::from_str::<u8>("x").unwrap_err()),
            HttpError::xml(TestError("unclosed tag")),
        ];

        for err in &errors {
            let classes = [
                err.is_timeout(),
                err.is_redirect_limit(),
                err.is_transport(),
                err.is_decode(),
                err.is_config(),
            ];
            assert_eq!(
                classes.iter().filter(|c| **c).count(),
                1,
                "exactly one class for {err}"
            );
        }
    }

    #[test]
    fn test_replay_keeps_uri_kind() {
        let err = HttpError::InvalidUri {
            url: "::".to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: "relative URL without a base".to_owned(),
        };

        match err.replay() {
            HttpError::InvalidUri { url, kind, .. } => {
                assert_eq!(url, "::");
                assert_eq!(kind, InvalidUriKind::ParseError);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_replay_wraps_header_errors() {
        let header_err = http::header::HeaderName::from_bytes(b"bad header").unwrap_err();
        let err = HttpError::from(header_err);

        let replayed = err.replay();
        assert!(replayed.is_config());
        assert!(replayed.to_string().contains("Invalid header name"));
    }

    #[test]
    fn test_replay_keeps_encode_class() {
        let err = HttpError::body_encode(TestError("key must be a string"));
        assert!(err.is_config());

        let replayed = err.replay();
        assert!(replayed.is_config());
        assert!(replayed.to_string().contains("key must be a string"));
    }

    #[test]
    fn test_redirect_limit_message() {
        let err = HttpError::RedirectLimit { budget: 10 };
        assert_eq!(err.to_string(), "Stopped after 10 redirects");
    }
}
