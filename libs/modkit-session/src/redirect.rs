//! Redirect budget enforcement.
//!
//! [`RedirectBudget`] is handed to `tower_http`'s follow-redirect layer with
//! the budget resolved for the transmission. It counts hops itself, so every
//! transmission needs a fresh policy value.
//!
//! A budget of `B` lets `B` redirects through and fails on redirect `B + 1`:
//! the check is `hops > budget`, so a logical request makes at most `B + 1`
//! network attempts.
//!
//! A `Host` override only survives hops that stay on the same host and port.
//! Once a hop leaves that authority the header is dropped for the rest of the
//! chain and the client derives `Host` from each target URI.

use std::fmt;
use std::sync::Arc;

use http::{Request, StatusCode, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

use crate::config::RedirectConfig;
use crate::error::HttpError;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// One redirect hop, as shown to a [`RedirectCheck`].
#[derive(Debug, Clone, Copy)]
pub struct RedirectHop<'a> {
    /// Status of the redirect response.
    pub status: StatusCode,
    /// URI that answered with the redirect.
    pub previous: &'a Uri,
    /// Resolved `Location` target.
    pub location: &'a Uri,
    /// Redirects taken so far, this one included.
    pub hops: usize,
}

/// Caller-supplied redirect check. Runs on every hop that passed the budget
/// and downgrade checks; an `Err(reason)` stops the chain with
/// [`HttpError::RedirectRefused`].
pub type RedirectCheck = Arc<dyn Fn(&RedirectHop<'_>) -> Result<(), String> + Send + Sync>;

/// Follow-redirect policy bound to one transmission's budget.
#[derive(Clone)]
pub struct RedirectBudget {
    budget: usize,
    config: RedirectConfig,
    check: Option<RedirectCheck>,
    hops: usize,
    cross_origin_detected: bool,
    authority_changed: bool,
}

impl fmt::Debug for RedirectBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectBudget")
            .field("budget", &self.budget)
            .field("config", &self.config)
            .field("check", &self.check.is_some())
            .field("hops", &self.hops)
            .field("cross_origin_detected", &self.cross_origin_detected)
            .field("authority_changed", &self.authority_changed)
            .finish()
    }
}

impl RedirectBudget {
    #[must_use]
    pub fn new(budget: usize, config: RedirectConfig) -> Self {
        Self {
            budget,
            config,
            check: None,
            hops: 0,
            cross_origin_detected: false,
            authority_changed: false,
        }
    }

    /// Attach a caller redirect check.
    #[must_use]
    pub fn with_check(mut self, check: Option<RedirectCheck>) -> Self {
        self.check = check;
        self
    }

    /// Redirects followed so far.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.hops
    }

    /// Count a hop and decide whether it may be followed.
    fn record_hop(
        &mut self,
        status: StatusCode,
        previous: &Uri,
        target: &Uri,
    ) -> Result<(), HttpError> {
        self.hops += 1;
        if self.hops > self.budget {
            tracing::debug!(
                hops = self.hops,
                budget = self.budget,
                "redirect budget exhausted"
            );
            return Err(HttpError::RedirectLimit {
                budget: self.budget,
            });
        }

        if !self.config.allow_https_downgrade && Self::is_https_downgrade(previous, target) {
            return Err(HttpError::RedirectRefused {
                location: target.to_string(),
                reason: "HTTPS to HTTP downgrade".to_owned(),
            });
        }

        if let Some(check) = &self.check {
            let hop = RedirectHop {
                status,
                previous,
                location: target,
                hops: self.hops,
            };
            check(&hop).map_err(|reason| {
                tracing::debug!(%target, %reason, "redirect refused by check");
                HttpError::RedirectRefused {
                    location: target.to_string(),
                    reason,
                }
            })?;
        }

        if !Self::is_same_origin(previous, target) {
            self.cross_origin_detected = true;
            tracing::debug!(%previous, %target, "cross-origin redirect");
        }
        if !Self::is_same_authority(previous, target) {
            self.authority_changed = true;
        }

        Ok(())
    }

    /// Same scheme, host and port. A missing scheme counts as `https`.
    fn is_same_origin(previous: &Uri, target: &Uri) -> bool {
        let prev_scheme = previous.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let prev_port = previous
            .port_u16()
            .unwrap_or_else(|| default_port(prev_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        prev_scheme == target_scheme
            && previous.host().unwrap_or("") == target.host().unwrap_or("")
            && prev_port == target_port
    }

    /// Same host and explicit port; the scheme is ignored.
    fn is_same_authority(previous: &Uri, target: &Uri) -> bool {
        previous.host() == target.host() && previous.port_u16() == target.port_u16()
    }

    fn is_https_downgrade(previous: &Uri, target: &Uri) -> bool {
        previous.scheme_str() == Some("https") && target.scheme_str() == Some("http")
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone> Policy<B, HttpError> for RedirectBudget {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, HttpError> {
        self.record_hop(attempt.status(), attempt.previous(), attempt.location())?;
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        let headers = request.headers_mut();
        if self.authority_changed {
            headers.remove(header::HOST);
        }
        if self.cross_origin_detected && self.config.strip_sensitive_headers {
            for name in SENSITIVE_HEADERS {
                headers.remove(name);
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 replay the original body
        Some(body.clone())
    }
}
