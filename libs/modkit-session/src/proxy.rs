//! Proxy selection.
//!
//! An explicit proxy from the [`PolicyContext`] always wins. Next comes a
//! session's [`ProxySelector`], if one is installed. Otherwise the standard
//! environment variables (`HTTP_PROXY`, `HTTPS_PROXY`, `ALL_PROXY`, `NO_PROXY`
//! and their lowercase forms) decide. The environment is read once per
//! process; every later request reuses the same matcher.

use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderValue, Uri};
use hyper_util::client::proxy::matcher::Matcher;
use url::Url;

use crate::error::HttpError;
use crate::policy::PolicyContext;

static ENV_PROXY: OnceLock<Matcher> = OnceLock::new();

/// Counter for test verification that the environment is only read once.
#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_env_matcher() -> Matcher {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    tracing::debug!("loading proxy configuration from environment");
    Matcher::from_env()
}

/// Process-wide proxy matcher built from the environment on first use.
///
/// Concurrent first callers block until the single initialisation finishes.
pub fn env_matcher() -> &'static Matcher {
    ENV_PROXY.get_or_init(load_env_matcher)
}

/// Proxy endpoint a connection pool is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyTarget {
    /// Proxy address, always `http://host:port`.
    pub uri: Uri,
    /// Pre-encoded `Basic` credentials taken from the proxy URL userinfo.
    pub auth: Option<HeaderValue>,
}

/// Caller-supplied proxy choice per destination. Replaces the environment
/// lookup; `None` connects directly.
pub type ProxySelector = Arc<dyn Fn(&Uri) -> Option<Url> + Send + Sync>;

/// Parse and validate a proxy URL. Only `http://` proxies are supported.
///
/// # Errors
/// Returns [`HttpError::InvalidProxy`] for malformed URLs and other schemes.
pub fn parse_proxy_url(proxy: &str) -> Result<Url, HttpError> {
    let url = Url::parse(proxy).map_err(|e| HttpError::InvalidProxy {
        proxy: proxy.to_owned(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" {
        return Err(HttpError::InvalidProxy {
            proxy: proxy.to_owned(),
            reason: format!("unsupported proxy scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(HttpError::InvalidProxy {
            proxy: proxy.to_owned(),
            reason: "missing host".to_owned(),
        });
    }
    Ok(url)
}

/// Pick the proxy for `dst`: explicit policy proxy first, then `selector`,
/// else the environment.
///
/// # Errors
/// Returns [`HttpError::InvalidProxy`] if the chosen proxy is not usable.
pub fn select_proxy(
    policy: &PolicyContext,
    selector: Option<&ProxySelector>,
    dst: &Uri,
) -> Result<Option<ProxyTarget>, HttpError> {
    if let Some(explicit) = policy.proxy() {
        return target_from_url(explicit).map(Some);
    }
    if let Some(selector) = selector {
        return selector(dst).as_ref().map(target_from_url).transpose();
    }

    let Some(intercept) = env_matcher().intercept(dst) else {
        return Ok(None);
    };
    let uri = intercept.uri().clone();
    if uri.scheme_str() != Some("http") {
        return Err(HttpError::InvalidProxy {
            proxy: uri.to_string(),
            reason: "only http:// proxies are supported".to_owned(),
        });
    }
    Ok(Some(ProxyTarget {
        uri,
        auth: intercept.basic_auth().cloned(),
    }))
}

fn target_from_url(url: &Url) -> Result<ProxyTarget, HttpError> {
    let invalid = |reason: String| HttpError::InvalidProxy {
        proxy: url.to_string(),
        reason,
    };

    if url.scheme() != "http" {
        return Err(invalid(format!(
            "unsupported proxy scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_owned()))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let uri: Uri = format!("http://{host}:{port}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;

    let auth = if url.username().is_empty() {
        None
    } else {
        let user = percent_decode(url.username());
        let password = percent_decode(url.password().unwrap_or(""));
        let token = STANDARD.encode(format!("{user}:{password}"));
        let mut value = HeaderValue::from_str(&format!("Basic {token}"))?;
        value.set_sensitive(true);
        Some(value)
    };

    Ok(ProxyTarget { uri, auth })
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}
