use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use cookie::Cookie;
use http::header::{
    ACCEPT_CHARSET, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, REFERER,
    USER_AGENT,
};
use http::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;
use url::form_urlencoded;

use crate::cookies::parse_cookie_string;
use crate::encode::{BodyEncoder, FormData, Json, UrlEncoded, Xml};
use crate::error::HttpError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Specification of one outbound HTTP transaction.
///
/// Setters chain on `&mut self` and never fail on the spot: the first
/// configuration error is recorded and returned when the request is
/// transmitted.
///
/// # Example
///
/// ```ignore
/// let mut request = Request::post("/users");
/// request
///     .set_query_string(&[("notify", "true")])
///     .set_body_json(&serde_json::json!({"name": "ada"}))
///     .set_timeout(Duration::from_secs(5));
/// let response = session.transmit(request).await?;
/// ```
#[derive(Debug)]
pub struct Request {
    id: u64,
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    redirect_budget: Option<usize>,
    timeout: Option<Duration>,
    proxy: Option<Url>,
    cookies: Option<Vec<Cookie<'static>>>,
    host: Option<String>,
    cancellation: Option<CancellationToken>,
    trace: bool,
    error: Option<HttpError>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Create an empty `GET` request with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_request_id(),
            url: String::new(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            redirect_budget: None,
            timeout: None,
            proxy: None,
            cookies: None,
            host: None,
            cancellation: None,
            trace: false,
            error: None,
        }
    }

    /// Create a request with the given method and URL.
    ///
    /// The URL may be relative when the session has a base URL.
    #[must_use]
    pub fn with_method(method: Method, url: impl Into<String>) -> Self {
        let mut request = Self::new();
        request.method = method;
        request.url = url.into();
        request
    }

    /// Create a `GET` request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::with_method(Method::GET, url)
    }

    /// Create a `POST` request.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::with_method(Method::POST, url)
    }

    /// Create a `PUT` request.
    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::with_method(Method::PUT, url)
    }

    /// Create a `PATCH` request.
    #[must_use]
    pub fn patch(url: impl Into<String>) -> Self {
        Self::with_method(Method::PATCH, url)
    }

    /// Create a `DELETE` request.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::with_method(Method::DELETE, url)
    }

    /// Convert a pre-built `http::Request`, keeping its method, URI, headers
    /// and body.
    #[must_use]
    pub fn from_http(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let mut converted = Self::with_method(parts.method, parts.uri.to_string());
        converted.headers = parts.headers;
        if !body.is_empty() {
            converted.body = Some(body);
        }
        converted
    }

    /// Copy every field into a new request with a new identity.
    ///
    /// The cancellation token is shared: cancelling it aborts both requests.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            id: next_request_id(),
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.as_ref().map(|b| Bytes::copy_from_slice(b)),
            redirect_budget: self.redirect_budget,
            timeout: self.timeout,
            proxy: self.proxy.clone(),
            cookies: self.cookies.clone(),
            host: self.host.clone(),
            cancellation: self.cancellation.clone(),
            trace: self.trace,
            error: self.error.as_ref().map(HttpError::replay),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Process-unique identity, increasing with creation order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Redirect budget set on this request, if any.
    #[must_use]
    pub fn redirect_budget(&self) -> Option<usize> {
        self.redirect_budget
    }

    /// Timeout set on this request, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Proxy set on this request, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    #[must_use]
    pub fn cookies(&self) -> Option<&[Cookie<'static>]> {
        self.cookies.as_deref()
    }

    /// Host override sent in place of the URL authority.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    #[must_use]
    pub fn trace_enabled(&self) -> bool {
        self.trace
    }

    /// Decode the `Authorization: Basic` credentials, if present.
    #[must_use]
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_owned(), password.to_owned()))
    }

    /// Returns `true` if a setter recorded a configuration error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn take_error(&mut self) -> Option<HttpError> {
        self.error.take()
    }

    pub(crate) fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }

    pub(crate) fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }

    pub(crate) fn take_cookies(&mut self) -> Option<Vec<Cookie<'static>>> {
        self.cookies.take()
    }

    /// Record the first error only; later setters keep running so the
    /// request stays inspectable.
    pub(crate) fn record_error(&mut self, err: HttpError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Merge `query` into the URL's query string.
    ///
    /// Keys present in `query` replace every existing value for that key;
    /// other existing keys keep their position.
    pub fn set_query_string<T: Serialize + ?Sized>(&mut self, query: &T) -> &mut Self {
        match serde_urlencoded::to_string(query) {
            Ok(encoded) => self.url = merge_query(&self.url, &encoded),
            Err(e) => self.record_error(HttpError::FormEncode(e)),
        }
        self
    }

    /// Set a raw body. Content type is left to the caller.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// Encode the body with `encoder`, setting `Content-Type` unless one is
    /// already present.
    pub fn set_encoded_body(&mut self, encoder: &impl BodyEncoder) -> &mut Self {
        match encoder.encode() {
            Ok(encoded) => {
                if !self.headers.contains_key(CONTENT_TYPE) {
                    self.headers.insert(CONTENT_TYPE, encoded.content_type);
                }
                self.body = Some(encoded.bytes);
            }
            Err(e) => self.record_error(e),
        }
        self
    }

    pub fn set_body_json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        self.set_encoded_body(&Json(value))
    }

    pub fn set_body_xml<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        self.set_encoded_body(&Xml(value))
    }

    /// Encode `value` as `application/x-www-form-urlencoded`.
    pub fn set_body_form<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        self.set_encoded_body(&UrlEncoded(value))
    }

    /// Encode `form` as `multipart/form-data`.
    pub fn set_body_form_data(&mut self, form: &FormData) -> &mut Self {
        self.set_encoded_body(form)
    }

    /// Append a header value, keeping existing values for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Replace every value of a header with a single value.
    pub fn set_header_single(&mut self, name: &str, value: &str) -> &mut Self {
        match parse_header(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Merge a header map, replacing all values of each name present in `headers`.
    pub fn set_headers(&mut self, headers: &HeaderMap) -> &mut Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    pub fn set_referer(&mut self, referer: &str) -> &mut Self {
        self.set_typed_header(REFERER, referer)
    }

    /// Set `Accept-Charset`.
    pub fn set_charset(&mut self, charset: &str) -> &mut Self {
        self.set_typed_header(ACCEPT_CHARSET, charset)
    }

    pub fn set_user_agent(&mut self, user_agent: &str) -> &mut Self {
        self.set_typed_header(USER_AGENT, user_agent)
    }

    pub fn set_basic_auth(&mut self, user: &str, password: &str) -> &mut Self {
        let token = STANDARD.encode(format!("{user}:{password}"));
        self.set_typed_header(AUTHORIZATION, &format!("Basic {token}"))
    }

    /// Route this request through `proxy`. Only `http://` proxies are supported.
    pub fn set_proxy_url(&mut self, proxy: &str) -> &mut Self {
        match crate::proxy::parse_proxy_url(proxy) {
            Ok(url) => self.proxy = Some(url),
            Err(e) => self.record_error(e),
        }
        self
    }

    pub fn set_proxy(&mut self, proxy: Url) -> &mut Self {
        self.proxy = Some(proxy);
        self
    }

    /// Override the `Host` header independently of the URL.
    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = Some(host.into());
        self
    }

    /// Replace the request's cookie list.
    pub fn set_cookies(&mut self, cookies: Vec<Cookie<'static>>) -> &mut Self {
        self.cookies = Some(cookies);
        self
    }

    /// Append cookies parsed from a `"k=v; k2=v2"` string.
    pub fn add_cookie_string(&mut self, raw: &str) -> &mut Self {
        self.cookies
            .get_or_insert_with(Vec::new)
            .extend(parse_cookie_string(raw));
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_redirect_budget(&mut self, budget: usize) -> &mut Self {
        self.redirect_budget = Some(budget);
        self
    }

    /// Abort the transmission when `token` is cancelled.
    pub fn set_cancellation(&mut self, token: CancellationToken) -> &mut Self {
        self.cancellation = Some(token);
        self
    }

    /// Record [`TraceInfo`](crate::TraceInfo) on the response.
    pub fn enable_trace(&mut self) -> &mut Self {
        self.trace = true;
        self
    }

    fn set_typed_header(&mut self, name: HeaderName, value: &str) -> &mut Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.record_error(e.into()),
        }
        self
    }
}

/// # Errors
/// Returns an error if `name` or `value` is not a valid header component.
pub fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    let name = HeaderName::from_bytes(name.as_bytes())?;
    let value = HeaderValue::from_str(value)?;
    Ok((name, value))
}

/// Overlay `overlay` onto `base`: every name present in `overlay` replaces
/// all of its values in `base`. Name matching is case-insensitive.
pub fn merge_headers(base: &mut HeaderMap, overlay: &HeaderMap) {
    for name in overlay.keys() {
        base.remove(name);
        for value in overlay.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

fn merge_query(url: &str, encoded: &str) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (url, None),
    };
    let (path, existing) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));

    let incoming: Vec<(String, String)> = form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect();

    let mut merged: Vec<(String, String)> = form_urlencoded::parse(existing.as_bytes())
        .into_owned()
        .filter(|(key, _)| !incoming.iter().any(|(k, _)| k == key))
        .collect();
    merged.extend(incoming);

    let mut out = path.to_owned();
    if !merged.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(merged)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let first = Request::new();
        let second = Request::new();
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_defaults() {
        let request = Request::new();
        assert_eq!(request.method(), Method::GET);
        assert!(request.url().is_empty());
        assert!(request.redirect_budget().is_none());
        assert!(request.timeout().is_none());
        assert!(!request.trace_enabled());
    }

    #[test]
    fn test_copy_is_deep_with_new_identity() {
        let mut original = Request::post("http://example.com/a");
        original
            .set_header("X-Trace", "1")
            .set_body("payload")
            .set_timeout(Duration::from_secs(3))
            .set_redirect_budget(4)
            .set_proxy_url("http://proxy.local:3128")
            .add_cookie_string("a=1; b=2");

        let mut copy = original.copy();

        assert_ne!(copy.id(), original.id());
        assert_eq!(copy.url(), original.url());
        assert_eq!(copy.method(), original.method());
        assert_eq!(copy.headers(), original.headers());
        assert_eq!(copy.body(), original.body());
        assert_eq!(copy.timeout(), original.timeout());
        assert_eq!(copy.redirect_budget(), original.redirect_budget());
        assert_eq!(copy.proxy(), original.proxy());
        assert_eq!(copy.cookies(), original.cookies());

        copy.add_cookie_string("c=3").set_header("X-Trace", "2");

        assert_eq!(original.cookies().unwrap().len(), 2);
        assert_eq!(copy.cookies().unwrap().len(), 3);
        assert_eq!(original.headers().get_all("x-trace").iter().count(), 1);
    }

    #[test]
    fn test_copy_body_does_not_share_buffer() {
        let mut original = Request::new();
        original.set_body(Bytes::from_static(b"abc"));

        let copy = original.copy();
        let a = original.body().unwrap();
        let b = copy.body().unwrap();
        assert_eq!(a, b);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_copy_carries_deferred_error() {
        let mut original = Request::new();
        original.set_header("bad header", "v");

        let mut copy = original.copy();
        assert!(copy.has_error());
        assert!(copy.take_error().unwrap().is_config());
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let mut request = Request::new();
        request.set_header("bad header", "v").set_header("X-Ok", "1");

        assert!(request.has_error());
        assert_eq!(request.headers().get("x-ok").unwrap(), "1");
        assert!(matches!(
            request.take_error(),
            Some(HttpError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn test_first_error_wins() {
        let mut request = Request::new();
        request
            .set_proxy_url("socks5://proxy:1080")
            .set_header("bad header", "v");

        assert!(matches!(
            request.take_error(),
            Some(HttpError::InvalidProxy { .. })
        ));
    }

    #[test]
    fn test_set_header_appends_and_single_replaces() {
        let mut request = Request::new();
        request.set_header("Accept", "a").set_header("accept", "b");
        assert_eq!(request.headers().get_all("accept").iter().count(), 2);

        request.set_header_single("ACCEPT", "c");
        let values: Vec<_> = request.headers().get_all("accept").iter().collect();
        assert_eq!(values, vec!["c"]);
    }

    #[test]
    fn test_set_headers_replaces_per_name() {
        let mut request = Request::new();
        request.set_header("X-A", "1").set_header("X-B", "1");

        let mut overlay = HeaderMap::new();
        overlay.append("x-a", HeaderValue::from_static("2"));
        overlay.append("x-a", HeaderValue::from_static("3"));
        request.set_headers(&overlay);

        let a: Vec<_> = request.headers().get_all("x-a").iter().collect();
        assert_eq!(a, vec!["2", "3"]);
        assert_eq!(request.headers().get("x-b").unwrap(), "1");
    }

    #[test]
    fn test_query_merge_replaces_matching_keys() {
        let mut request = Request::get("http://example.com/search?q=old&page=2#top");
        request.set_query_string(&[("q", "new value"), ("lang", "en")]);

        assert_eq!(
            request.url(),
            "http://example.com/search?page=2&q=new+value&lang=en#top"
        );
    }

    #[test]
    fn test_query_on_relative_url() {
        let mut request = Request::get("/items");
        request.set_query_string(&[("limit", "5")]);
        assert_eq!(request.url(), "/items?limit=5");
    }

    #[test]
    fn test_query_with_unsupported_shape_is_deferred() {
        #[derive(Serialize)]
        struct Nested {
            inner: Vec<Vec<u8>>,
        }

        let mut request = Request::get("/items");
        request.set_query_string(&Nested {
            inner: vec![vec![1]],
        });
        assert!(matches!(
            request.take_error(),
            Some(HttpError::FormEncode(_))
        ));
    }

    #[test]
    fn test_basic_auth_round_trip() {
        let mut request = Request::new();
        request.set_basic_auth("ada", "s3cr:et");

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Basic YWRhOnMzY3I6ZXQ="
        );
        assert_eq!(
            request.basic_auth(),
            Some(("ada".to_owned(), "s3cr:et".to_owned()))
        );
    }

    #[test]
    fn test_json_body_sets_content_type_once() {
        let mut request = Request::post("/users");
        request.set_body_json(&serde_json::json!({"name": "ada"}));

        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(request.body().unwrap().as_ref(), br#"{"name":"ada"}"#);
    }

    #[test]
    fn test_explicit_content_type_is_kept() {
        let mut request = Request::post("/users");
        request
            .set_header_single("Content-Type", "application/vnd.api+json")
            .set_body_json(&serde_json::json!({}));

        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/vnd.api+json"
        );
    }

    #[test]
    fn test_convenience_headers() {
        let mut request = Request::new();
        request
            .set_referer("http://example.com/")
            .set_charset("utf-8")
            .set_user_agent("agent/1");

        assert_eq!(request.headers().get(REFERER).unwrap(), "http://example.com/");
        assert_eq!(request.headers().get(ACCEPT_CHARSET).unwrap(), "utf-8");
        assert_eq!(request.headers().get(USER_AGENT).unwrap(), "agent/1");
    }

    #[test]
    fn test_from_http() {
        let raw = http::Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/x")
            .header("x-a", "1")
            .body(Bytes::from_static(b"data"))
            .unwrap();

        let request = Request::from_http(raw);
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url(), "http://example.com/x");
        assert_eq!(request.headers().get("x-a").unwrap(), "1");
        assert_eq!(request.body().unwrap().as_ref(), b"data");
    }
}
