//! Per-transmission policy resolution.
//!
//! A [`PolicyContext`] is computed once at the start of every transmission and
//! then handed explicitly to the collaborators that need it: the proxy
//! selector, the redirect policy and the middleware chain. Nothing re-resolves
//! it per redirect hop.

use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::config::{DEFAULT_REDIRECT_BUDGET, DEFAULT_TIMEOUT};
use crate::request::Request;

/// Session-level fallbacks for the policy fields.
#[derive(Debug, Clone, Default)]
pub struct PolicyDefaults {
    /// Session timeout, used when the request sets none.
    pub timeout: Option<Duration>,
    /// Session redirect budget, used when the request sets none.
    pub redirect_budget: Option<usize>,
    /// Session proxy, used when the request sets none.
    pub proxy: Option<Url>,
    /// Record trace timings for every request of the session.
    pub trace: bool,
}

/// Resolved, read-only policy for one transmission.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    redirect_budget: usize,
    proxy: Option<Url>,
    timeout: Duration,
    deadline: Instant,
    trace: bool,
}

impl PolicyContext {
    /// Resolve each field as request value, else session value, else the
    /// built-in default. A zero timeout counts as unset.
    #[must_use]
    pub fn resolve(request: &Request, session: &PolicyDefaults) -> Self {
        let timeout = request
            .timeout()
            .filter(|t| !t.is_zero())
            .or(session.timeout.filter(|t| !t.is_zero()))
            .unwrap_or(DEFAULT_TIMEOUT);

        let redirect_budget = request
            .redirect_budget()
            .or(session.redirect_budget)
            .unwrap_or(DEFAULT_REDIRECT_BUDGET);

        let proxy = request.proxy().or(session.proxy.as_ref()).cloned();

        Self {
            redirect_budget,
            proxy,
            timeout,
            deadline: deadline_after(timeout),
            trace: request.trace_enabled() || session.trace,
        }
    }

    /// Maximum number of redirects the transmission may follow.
    #[must_use]
    pub fn redirect_budget(&self) -> usize {
        self.redirect_budget
    }

    /// Explicit proxy override. `None` means the environment decides.
    #[must_use]
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Effective timeout of the transmission.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Instant at which the transmission is abandoned.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether trace timings are recorded.
    #[must_use]
    pub fn trace(&self) -> bool {
        self.trace
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        // Roughly 30 years, same horizon tokio uses for "never".
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn session_defaults() -> PolicyDefaults {
        PolicyDefaults {
            timeout: Some(Duration::from_secs(5)),
            redirect_budget: Some(3),
            proxy: Some(Url::parse("http://session-proxy:3128").unwrap()),
            trace: false,
        }
    }

    #[test]
    fn test_builtin_defaults_when_nothing_set() {
        let request = Request::get("http://example.com/");
        let policy = PolicyContext::resolve(&request, &PolicyDefaults::default());

        assert_eq!(policy.redirect_budget(), DEFAULT_REDIRECT_BUDGET);
        assert_eq!(policy.timeout(), DEFAULT_TIMEOUT);
        assert!(policy.proxy().is_none());
        assert!(!policy.trace());
    }

    #[test]
    fn test_session_values_fill_unset_request_fields() {
        let request = Request::get("http://example.com/");
        let policy = PolicyContext::resolve(&request, &session_defaults());

        assert_eq!(policy.redirect_budget(), 3);
        assert_eq!(policy.timeout(), Duration::from_secs(5));
        assert_eq!(
            policy.proxy().map(Url::as_str),
            Some("http://session-proxy:3128/")
        );
    }

    #[test]
    fn test_request_values_win() {
        let mut request = Request::get("http://example.com/");
        request
            .set_timeout(Duration::from_millis(250))
            .set_redirect_budget(0)
            .set_proxy_url("http://request-proxy:8080")
            .enable_trace();

        let policy = PolicyContext::resolve(&request, &session_defaults());

        assert_eq!(policy.redirect_budget(), 0);
        assert_eq!(policy.timeout(), Duration::from_millis(250));
        assert_eq!(
            policy.proxy().map(Url::as_str),
            Some("http://request-proxy:8080/")
        );
        assert!(policy.trace());
    }

    #[test]
    fn test_zero_timeout_falls_back() {
        let mut request = Request::get("http://example.com/");
        request.set_timeout(Duration::ZERO);

        let policy = PolicyContext::resolve(&request, &session_defaults());
        assert_eq!(policy.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_is_fixed_at_resolution() {
        let mut request = Request::get("http://example.com/");
        request.set_timeout(Duration::from_secs(2));

        let before = Instant::now();
        let policy = PolicyContext::resolve(&request, &PolicyDefaults::default());
        let after = Instant::now();

        assert!(policy.deadline() >= before + Duration::from_secs(2));
        assert!(policy.deadline() <= after + Duration::from_secs(2));
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let mut request = Request::get("http://example.com/");
        request.set_timeout(Duration::MAX);

        let policy = PolicyContext::resolve(&request, &PolicyDefaults::default());
        assert!(policy.deadline() > Instant::now());
    }
}
