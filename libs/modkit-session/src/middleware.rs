//! Per-request hooks run just before dispatch.
//!
//! Middleware observes the fully assembled outbound request together with
//! its resolved [`PolicyContext`]. It may add or change headers, but cannot
//! change the method, the destination or the policy.

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Method, Uri};

use crate::policy::PolicyContext;

/// Outbound request as seen by middleware.
pub struct Outbound<'a> {
    request_id: u64,
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a mut HeaderMap,
    policy: &'a PolicyContext,
}

impl<'a> Outbound<'a> {
    pub(crate) fn new(
        request_id: u64,
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a mut HeaderMap,
        policy: &'a PolicyContext,
    ) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers,
            policy,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        self.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.uri
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers
    }

    /// Policy resolved for this transmission (redirect budget, proxy, deadline).
    #[must_use]
    pub fn policy(&self) -> &PolicyContext {
        self.policy
    }
}

/// Hook invoked once per transmission, before the network call.
///
/// Implemented for any `Fn(&mut Outbound<'_>) + Send + Sync`.
pub trait Middleware: Send + Sync {
    fn handle(&self, outbound: &mut Outbound<'_>);
}

impl<F> Middleware for F
where
    F: Fn(&mut Outbound<'_>) + Send + Sync,
{
    fn handle(&self, outbound: &mut Outbound<'_>) {
        self(outbound);
    }
}

/// Ordered list of middleware owned by a session.
///
/// Every [`run`](Self::run) walks the list with its own iterator, so
/// concurrent transmissions never share a position. Calling back into the
/// same session from inside a middleware is not supported.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Option<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(Some(middleware));
    }

    /// Register an entry that may be absent; absent entries are skipped.
    pub fn push_optional(&mut self, middleware: Option<Arc<dyn Middleware>>) {
        self.entries.push(middleware);
    }

    /// Number of registered entries, absent ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every present entry in registration order.
    pub fn run(&self, outbound: &mut Outbound<'_>) {
        for middleware in self.entries.iter().flatten() {
            middleware.handle(outbound);
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::policy::PolicyDefaults;
    use crate::request::Request;
    use parking_lot::Mutex;

    fn policy(budget: usize) -> PolicyContext {
        let mut request = Request::get("http://example.com/");
        request.set_redirect_budget(budget);
        PolicyContext::resolve(&request, &PolicyDefaults::default())
    }

    fn run_once(chain: &MiddlewareChain, policy: &PolicyContext) -> HeaderMap {
        let method = Method::GET;
        let uri: Uri = "http://example.com/".parse().unwrap();
        let mut headers = HeaderMap::new();
        let mut outbound = Outbound::new(7, &method, &uri, &mut headers, policy);
        chain.run(&mut outbound);
        headers
    }

    #[test]
    fn test_runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            chain.push(Arc::new(move |_: &mut Outbound<'_>| seen.lock().push(tag)));
        }

        run_once(&chain, &policy(10));

        assert_eq!(*seen.lock(), ["first", "second", "third"]);
    }

    #[test]
    fn test_absent_entries_are_skipped() {
        let mut chain = MiddlewareChain::new();
        chain.push_optional(None);
        chain.push(Arc::new(|out: &mut Outbound<'_>| {
            out.headers_mut()
                .insert("x-seen", http::HeaderValue::from_static("yes"));
        }));
        chain.push_optional(None);

        let headers = run_once(&chain, &policy(10));

        assert_eq!(chain.len(), 3);
        assert_eq!(headers["x-seen"], "yes");
    }

    #[test]
    fn test_middleware_observes_policy() {
        let budget = Arc::new(Mutex::new(None));
        let mut chain = MiddlewareChain::new();
        {
            let budget = Arc::clone(&budget);
            chain.push(Arc::new(move |out: &mut Outbound<'_>| {
                *budget.lock() = Some((out.request_id(), out.policy().redirect_budget()));
            }));
        }

        run_once(&chain, &policy(3));

        assert_eq!(*budget.lock(), Some((7, 3)));
    }

    #[test]
    fn test_concurrent_runs_each_see_every_entry() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut chain = MiddlewareChain::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            chain.push(Arc::new(move |_: &mut Outbound<'_>| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        let chain = Arc::new(chain);
        let policy = policy(10);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let chain = Arc::clone(&chain);
                let policy = &policy;
                scope.spawn(move || run_once(&chain, policy));
            }
        });

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 32);
    }
}
