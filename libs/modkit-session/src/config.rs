use std::time::Duration;

/// Default redirect budget applied when neither the request nor the session sets one.
pub const DEFAULT_REDIRECT_BUDGET: usize = 10;

/// Default transmission timeout applied when neither the request nor the session sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default User-Agent sent when no layer provides one.
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-session/", env!("CARGO_PKG_VERSION"));

/// Default cap on a buffered response body (64 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Redirect handling applied on top of the per-request budget.
///
/// The budget itself is not configured here: it comes from the request,
/// the session, or [`DEFAULT_REDIRECT_BUDGET`].
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Strip sensitive headers on cross-origin redirects (default: true)
    ///
    /// When a redirect goes to a different origin this removes:
    /// - `Authorization` header
    /// - `Cookie` header
    /// - `Proxy-Authorization` header
    pub strip_sensitive_headers: bool,

    /// Allow HTTPS to HTTP downgrades (default: true)
    ///
    /// When `false`, a redirect from an `https` URL to an `http` URL fails with
    /// [`HttpError::RedirectRefused`](crate::HttpError::RedirectRefused).
    pub allow_https_downgrade: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            strip_sensitive_headers: true,
            allow_https_downgrade: true,
        }
    }
}

impl RedirectConfig {
    /// Refuse HTTPS to HTTP downgrades in addition to header stripping.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strip_sensitive_headers: true,
            allow_https_downgrade: false,
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport and pool settings of a [`Session`](crate::Session).
///
/// These are read when the session builds a connection pool, which happens
/// lazily on the first transmission through a given proxy.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// TCP connect timeout (default: 30 seconds)
    pub dial_timeout: Duration,

    /// TCP keepalive interval (default: 30 seconds). `None` disables it.
    pub dial_keep_alive: Option<Duration>,

    /// Disable HTTP connection reuse (default: false)
    pub disable_keep_alives: bool,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default idle timeout.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,

    /// Do not install a cookie jar on the session (default: false)
    ///
    /// Without a jar, request cookies are sent as a `Cookie` header and
    /// `Set-Cookie` responses are not remembered.
    pub disable_cookie_jar: bool,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Accept any server certificate (default: false)
    ///
    /// **WARNING**: Only for talking to test servers with self-signed
    /// certificates. Signatures are still checked, identities are not.
    pub insecure_skip_verify: bool,

    /// Maximum buffered response body size in bytes (default: 64 MiB)
    pub max_body_size: usize,

    /// Redirect policy configuration
    pub redirect: RedirectConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            dial_keep_alive: Some(Duration::from_secs(30)),
            disable_keep_alives: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            disable_cookie_jar: false,
            tls_roots: TlsRootConfig::default(),
            insecure_skip_verify: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            redirect: RedirectConfig::default(),
        }
    }
}

impl SessionOptions {
    /// Options for tests against local mock servers: short dial timeout,
    /// no pooled connections left behind.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            pool_idle_timeout: Some(Duration::from_secs(5)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
