//! Cookie parsing, storage and the per-hop cookie layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderValue, Request, Response};
use parking_lot::RwLock;
use tower::{Layer, Service};
use url::Url;

/// Parse a `"k=v; k2=v2"` string into cookies.
///
/// Each segment is split on its first `=` and trimmed. Segments without `=`
/// or with an empty name are skipped.
#[must_use]
pub fn parse_cookie_string(raw: &str) -> Vec<Cookie<'static>> {
    raw.split(';')
        .filter_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie::new(name.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Render cookies as a single `Cookie` request header value.
pub(crate) fn cookie_header(cookies: &[Cookie<'_>]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let joined = cookies
        .iter()
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).ok()
}

/// Storage for cookies shared by every request of a session.
///
/// Implementations must tolerate concurrent calls from in-flight requests.
pub trait CookieStore: Send + Sync {
    /// Store the cookies carried by `Set-Cookie` header values received from `url`.
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url);

    /// The `Cookie` header value to send to `url`, if any cookie matches.
    fn cookies(&self, url: &Url) -> Option<HeaderValue>;
}

/// Default [`CookieStore`] backed by `cookie_store`.
///
/// A cookie with the same name, domain and path replaces the stored one.
#[derive(Debug, Default)]
pub struct Jar(RwLock<cookie_store::CookieStore>);

impl Jar {
    /// Store a `Set-Cookie` formatted string for `url`.
    pub fn add_cookie_str(&self, cookie: &str, url: &Url) {
        let cookies = Cookie::parse(cookie.to_owned()).ok().into_iter();
        self.0.write().store_response_cookies(cookies, url);
    }
}

impl CookieStore for Jar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies = cookie_headers
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value.to_owned()).ok());
        self.0.write().store_response_cookies(cookies, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let joined = self
            .0
            .read()
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        if joined.is_empty() {
            return None;
        }
        HeaderValue::from_str(&joined).ok()
    }
}

/// Tower layer that attaches stored cookies to every hop and records the
/// `Set-Cookie` headers of every response.
///
/// Placed inside the redirect follower, so each redirect hop is covered.
#[derive(Clone)]
pub struct CookieLayer {
    store: Arc<dyn CookieStore>,
}

impl CookieLayer {
    #[must_use]
    pub fn new(store: Arc<dyn CookieStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = CookieService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieService {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}

/// Service produced by [`CookieLayer`].
#[derive(Clone)]
pub struct CookieService<S> {
    inner: S,
    store: Arc<dyn CookieStore>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let url = Url::parse(&req.uri().to_string()).ok();

        if let Some(stored) = url.as_ref().and_then(|u| self.store.cookies(u)) {
            let value = match req.headers().get(COOKIE) {
                Some(existing) => join_cookie_values(existing, &stored).unwrap_or(stored),
                None => stored,
            };
            req.headers_mut().insert(COOKIE, value);
        }

        let store = Arc::clone(&self.store);
        let future = self.inner.call(req);

        Box::pin(async move {
            let response = future.await?;
            if let Some(url) = url {
                let mut set_cookies = response.headers().get_all(SET_COOKIE).iter();
                store.set_cookies(&mut set_cookies, &url);
            }
            Ok(response)
        })
    }
}

fn join_cookie_values(existing: &HeaderValue, stored: &HeaderValue) -> Option<HeaderValue> {
    let existing = existing.to_str().ok()?;
    let stored = stored.to_str().ok()?;
    HeaderValue::from_str(&format!("{existing}; {stored}")).ok()
}
