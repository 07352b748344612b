use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cookie::Cookie;
use http::header::{COOKIE, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use http::uri::Scheme;
use http::{HeaderMap, HeaderValue, Method, Uri};
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpInfo;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::RwLock;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::{FollowRedirectLayer, RequestUri};
use url::Url;

use crate::config::{DEFAULT_USER_AGENT, SessionOptions};
use crate::connector::{ProxyConnector, build_https_connector};
use crate::cookies::{CookieLayer, CookieStore, Jar, cookie_header, parse_cookie_string};
use crate::encode::FormData;
use crate::error::{HttpError, InvalidUriKind};
use crate::middleware::{Middleware, MiddlewareChain, Outbound};
use crate::options::{RequestOption, apply_options};
use crate::policy::{PolicyContext, PolicyDefaults};
use crate::proxy::{ProxySelector, ProxyTarget, parse_proxy_url, select_proxy};
use crate::redirect::{RedirectBudget, RedirectCheck, RedirectHop};
use crate::request::{Request, merge_headers, parse_header};
use crate::response::{Response, TraceInfo, decode};

type PoolClient = Client<HttpsConnector<ProxyConnector>, Full<Bytes>>;

/// Long-lived client configuration shared by many requests.
///
/// Configure a session with the `set_*` and `use_*` methods before traffic
/// starts, then share it (for example behind an `Arc`) between tasks. All
/// transmission methods take `&self` and are safe to call concurrently.
///
/// Connection pools are created lazily, one per proxy endpoint, and reused
/// for the lifetime of the session.
///
/// # Example
///
/// ```ignore
/// use modkit_session::{Session, options};
///
/// let mut session = Session::new();
/// session.set_base_url("https://api.example.com").set_timeout(Duration::from_secs(5));
///
/// let response = session
///     .get("/users", [options::query([("page", "2")])])
///     .await?
///     .error_for_status()?;
/// let users: Vec<User> = response.json()?;
/// ```
pub struct Session {
    base_url: Option<String>,
    headers: HeaderMap,
    defaults: PolicyDefaults,
    options: SessionOptions,
    jar: Option<Arc<dyn CookieStore>>,
    middleware: MiddlewareChain,
    proxy_selector: Option<ProxySelector>,
    redirect_check: Option<RedirectCheck>,
    clients: RwLock<HashMap<Option<ProxyTarget>, PoolClient>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("defaults", &self.defaults)
            .field("options", &self.options)
            .field("cookie_jar", &self.jar.is_some())
            .field("middleware", &self.middleware)
            .field("proxy_selector", &self.proxy_selector.is_some())
            .field("redirect_check", &self.redirect_check.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session with default options and an in-memory cookie jar.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    #[must_use]
    pub fn with_options(options: SessionOptions) -> Self {
        let jar: Option<Arc<dyn CookieStore>> = if options.disable_cookie_jar {
            None
        } else {
            Some(Arc::new(Jar::default()))
        };
        Self {
            base_url: None,
            headers: HeaderMap::new(),
            defaults: PolicyDefaults::default(),
            options,
            jar,
            middleware: MiddlewareChain::new(),
            proxy_selector: None,
            redirect_check: None,
            clients: RwLock::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Prefix prepended to every request URL. A trailing `/` is dropped.
    pub fn set_base_url(&mut self, base_url: &str) -> &mut Self {
        let trimmed = base_url.trim_end_matches('/');
        self.base_url = (!trimmed.is_empty()).then(|| trimmed.to_owned());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Append a default header sent with every request.
    ///
    /// # Errors
    /// Returns an error if the name or value is not a valid header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Replace every value of a default header.
    ///
    /// # Errors
    /// Returns an error if the name or value is not a valid header.
    pub fn set_header_single(&mut self, name: &str, value: &str) -> Result<&mut Self, HttpError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Merge `headers` into the defaults, replacing values per name.
    pub fn set_headers(&mut self, headers: &HeaderMap) -> &mut Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// # Errors
    /// Returns an error if `user_agent` is not a valid header value.
    pub fn set_user_agent(&mut self, user_agent: &str) -> Result<&mut Self, HttpError> {
        self.headers
            .insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        Ok(self)
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }

    /// Default timeout for requests that set none. Zero means unset.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.defaults.timeout = Some(timeout);
        self
    }

    /// Default redirect budget for requests that set none.
    pub fn set_redirect_budget(&mut self, budget: usize) -> &mut Self {
        self.defaults.redirect_budget = Some(budget);
        self
    }

    /// Default `http://` proxy for requests that set none.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidProxy`] for malformed or non-`http` URLs.
    pub fn set_proxy(&mut self, proxy: &str) -> Result<&mut Self, HttpError> {
        self.defaults.proxy = Some(parse_proxy_url(proxy)?);
        Ok(self)
    }

    /// Drop the session proxy; the environment decides again.
    pub fn clear_proxy(&mut self) -> &mut Self {
        self.defaults.proxy = None;
        self
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&Url> {
        self.defaults.proxy.as_ref()
    }

    /// Choose the proxy per destination instead of reading the environment.
    ///
    /// Consulted only when neither the request nor the session names a proxy.
    /// Returning `None` connects directly. The returned URL must be `http://`.
    pub fn set_proxy_selector(
        &mut self,
        selector: impl Fn(&Uri) -> Option<Url> + Send + Sync + 'static,
    ) -> &mut Self {
        self.proxy_selector = Some(Arc::new(selector));
        self
    }

    /// Go back to environment-based proxy selection.
    pub fn clear_proxy_selector(&mut self) -> &mut Self {
        self.proxy_selector = None;
        self
    }

    /// Run `check` on every redirect hop that is within budget.
    ///
    /// `Err(reason)` stops the chain with [`HttpError::RedirectRefused`].
    pub fn set_redirect_check(
        &mut self,
        check: impl Fn(&RedirectHop<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.redirect_check = Some(Arc::new(check));
        self
    }

    pub fn clear_redirect_check(&mut self) -> &mut Self {
        self.redirect_check = None;
        self
    }

    /// Skip TLS certificate verification. Existing pools are discarded.
    pub fn set_insecure_skip_verify(&mut self, skip: bool) -> &mut Self {
        self.options.insecure_skip_verify = skip;
        self.clients.get_mut().clear();
        self
    }

    /// Replace the cookie store; `None` disables cookie persistence.
    pub fn set_cookie_jar(&mut self, jar: Option<Arc<dyn CookieStore>>) -> &mut Self {
        self.jar = jar;
        self
    }

    /// Record [`TraceInfo`] for every request.
    pub fn enable_trace(&mut self) -> &mut Self {
        self.defaults.trace = true;
        self
    }

    pub fn disable_trace(&mut self) -> &mut Self {
        self.defaults.trace = false;
        self
    }

    /// Append a middleware; middleware runs in registration order.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append a middleware slot that may be empty.
    pub fn use_optional_middleware(
        &mut self,
        middleware: Option<Arc<dyn Middleware>>,
    ) -> &mut Self {
        self.middleware.push_optional(middleware);
        self
    }

    #[must_use]
    pub fn session_options(&self) -> &SessionOptions {
        &self.options
    }

    // ------------------------------------------------------------------
    // Cookies
    // ------------------------------------------------------------------

    /// Cookies the jar would send to `url`. Empty when the jar is disabled.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidUri`] if `url` cannot be parsed.
    pub fn cookies(&self, url: &str) -> Result<Vec<Cookie<'static>>, HttpError> {
        let url = parse_url(url)?;
        let Some(jar) = &self.jar else {
            return Ok(Vec::new());
        };
        Ok(jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(parse_cookie_string))
            .unwrap_or_default())
    }

    /// Store cookies in the jar as if `url` had set them. No-op without a jar.
    ///
    /// # Errors
    /// Returns an error if `url` cannot be parsed or a cookie is not a valid
    /// header value.
    pub fn set_cookies(&self, url: &str, cookies: &[Cookie<'_>]) -> Result<(), HttpError> {
        let url = parse_url(url)?;
        if let Some(jar) = &self.jar {
            store_cookies(jar.as_ref(), &url, cookies)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn get(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::get(url), options).await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn post(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::post(url), options).await
    }

    /// `POST` with a `multipart/form-data` body.
    ///
    /// # Errors
    /// See [`Session::transmit`].
    pub async fn post_form_data(
        &self,
        url: &str,
        form: &FormData,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        let mut request = Request::post(url);
        request.set_body_form_data(form);
        self.execute(request, options).await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn put(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::put(url), options).await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn patch(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::patch(url), options).await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn delete(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::delete(url), options).await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn head(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::with_method(Method::HEAD, url), options)
            .await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn options(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::with_method(Method::OPTIONS, url), options)
            .await
    }

    /// # Errors
    /// See [`Session::transmit`].
    pub async fn connect(
        &self,
        url: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        self.execute(Request::with_method(Method::CONNECT, url), options)
            .await
    }

    /// `GET` `url` and write the decoded body to `path`. Returns the number
    /// of bytes written.
    ///
    /// # Errors
    /// See [`Session::transmit`]; [`HttpError::Io`] if the file cannot be
    /// written.
    pub async fn download(
        &self,
        url: &str,
        path: impl AsRef<Path>,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<u64, HttpError> {
        let response = self.get(url, options).await?;
        tokio::fs::write(path.as_ref(), response.body()).await?;
        Ok(response.body().len() as u64)
    }

    /// Apply `options` to `request`, then transmit it.
    ///
    /// # Errors
    /// See [`Session::transmit`].
    pub async fn execute(
        &self,
        mut request: Request,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<Response, HttpError> {
        apply_options(&mut request, options);
        self.transmit(request).await
    }

    /// Transmit a pre-built `http::Request` under the session defaults.
    ///
    /// # Errors
    /// See [`Session::transmit`].
    pub async fn send_http(&self, request: http::Request<Bytes>) -> Result<Response, HttpError> {
        self.transmit(Request::from_http(request)).await
    }

    // ------------------------------------------------------------------
    // Transmission
    // ------------------------------------------------------------------

    /// Send `request` and return the fully buffered, decoded response.
    ///
    /// Redirects are followed inside the call up to the resolved budget.
    /// Any HTTP status is a successful transmission; use
    /// [`Response::error_for_status`] to turn 4xx/5xx into an error.
    ///
    /// # Errors
    /// - configuration errors recorded on the request, an invalid URL, or an
    ///   unusable proxy ([`HttpError::is_config`])
    /// - [`HttpError::Timeout`] when the deadline passes, [`HttpError::Cancelled`]
    ///   when the request's cancellation token fires ([`HttpError::is_timeout`])
    /// - [`HttpError::RedirectLimit`] / [`HttpError::RedirectRefused`]
    ///   ([`HttpError::is_redirect_limit`])
    /// - [`HttpError::Transport`] / [`HttpError::Tls`] for network failures
    /// - [`HttpError::Decode`] / [`HttpError::BodyTooLarge`] while reading the body
    pub async fn transmit(&self, mut request: Request) -> Result<Response, HttpError> {
        if let Some(err) = request.take_error() {
            return Err(err);
        }

        let raw_url = match &self.base_url {
            Some(base) => format!("{base}{}", request.url()),
            None => request.url().to_owned(),
        };
        let url = parse_url(&raw_url)?;
        let uri: Uri = url.as_str().parse().map_err(|e: http::uri::InvalidUri| {
            HttpError::InvalidUri {
                url: raw_url.clone(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            }
        })?;

        let policy = PolicyContext::resolve(&request, &self.defaults);
        let proxy = select_proxy(&policy, self.proxy_selector.as_ref(), &uri)?;
        let client = self.client_for(proxy.as_ref())?;

        let request_id = request.id();
        let method = request.method().clone();
        let cancellation = request.cancellation().cloned();

        let mut headers = self.headers.clone();
        merge_headers(&mut headers, &request.take_headers());
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        if let Some(host) = request.host() {
            headers.insert(HOST, HeaderValue::from_str(host)?);
        }
        if let Some(cookies) = request.take_cookies() {
            self.attach_cookies(&url, &cookies, &mut headers)?;
        }

        self.middleware.run(&mut Outbound::new(
            request_id,
            &method,
            &uri,
            &mut headers,
            &policy,
        ));

        let mut outgoing = http::Request::new(Full::new(request.take_body().unwrap_or_default()));
        *outgoing.method_mut() = method;
        *outgoing.uri_mut() = uri;
        *outgoing.headers_mut() = headers;

        tracing::debug!(
            request_id,
            method = %outgoing.method(),
            url = %url,
            proxied = proxy.is_some(),
            redirect_budget = policy.redirect_budget(),
            "dispatching request"
        );

        let proxy_auth = proxy.and_then(|p| p.auth);
        let exchange = self.exchange(client, outgoing, &policy, proxy_auth, request_id);
        let timed = async {
            tokio::time::timeout_at(policy.deadline(), exchange)
                .await
                .map_err(|_| HttpError::Timeout(policy.timeout()))?
        };

        let result = match cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(HttpError::Cancelled),
                    result = timed => result,
                }
            }
            None => timed.await,
        };

        match &result {
            Ok(response) => tracing::debug!(
                request_id,
                status = response.status().as_u16(),
                elapsed_ms = response.exec_time().as_millis(),
                "request completed"
            ),
            Err(err) => tracing::debug!(request_id, error = %err, "request failed"),
        }
        result
    }

    /// One logical exchange: redirects, cookies per hop, decompression and
    /// body decoding.
    async fn exchange(
        &self,
        client: PoolClient,
        outgoing: http::Request<Full<Bytes>>,
        policy: &PolicyContext,
        proxy_auth: Option<HeaderValue>,
        request_id: u64,
    ) -> Result<Response, HttpError> {
        let redirect = RedirectBudget::new(policy.redirect_budget(), self.options.redirect.clone())
            .with_check(self.redirect_check.clone());

        // Outer to inner: Decompression -> FollowRedirect -> [Cookies] ->
        // ProxyAuth -> ErrorMapping -> hyper client. Cookies and proxy
        // credentials sit inside the redirect loop so every hop gets them.
        let service = ServiceBuilder::new()
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(redirect))
            .option_layer(self.jar.clone().map(CookieLayer::new))
            .map_request(move |req: http::Request<Full<Bytes>>| {
                forward_proxy_auth(req, proxy_auth.as_ref())
            })
            .map_err(HttpError::from)
            .service(client);

        let started = Instant::now();
        let raw = service.oneshot(outgoing).await?;
        let headers_at = Instant::now();

        let final_uri = raw.extensions().get::<RequestUri>().map(|u| u.0.clone());
        let info = raw.extensions().get::<HttpInfo>().cloned();

        let response = decode(raw, self.options.max_body_size).await?;
        let finished = Instant::now();
        let exec_time = finished.duration_since(started);

        let trace = policy.trace().then(|| TraceInfo {
            server_time: headers_at.duration_since(started),
            response_time: finished.duration_since(headers_at),
            total_time: exec_time,
            remote_addr: info.as_ref().map(HttpInfo::remote_addr),
            local_addr: info.as_ref().map(HttpInfo::local_addr),
        });

        Ok(response.finish(request_id, exec_time, final_uri, trace))
    }

    /// Request cookies go into the jar when there is one, so later requests
    /// and redirect hops see them. Without a jar they are sent once as a
    /// `Cookie` header.
    fn attach_cookies(
        &self,
        url: &Url,
        cookies: &[Cookie<'static>],
        headers: &mut HeaderMap,
    ) -> Result<(), HttpError> {
        if let Some(jar) = &self.jar {
            return store_cookies(jar.as_ref(), url, cookies);
        }
        let Some(value) = cookie_header(cookies) else {
            return Ok(());
        };
        let value = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) => {
                let joined = format!("{existing}; {}", value.to_str().unwrap_or_default());
                HeaderValue::from_str(&joined)?
            }
            None => value,
        };
        headers.insert(COOKIE, value);
        Ok(())
    }

    /// Pool for `proxy`, built on first use.
    fn client_for(&self, proxy: Option<&ProxyTarget>) -> Result<PoolClient, HttpError> {
        let key = proxy.cloned();
        let cached = self.clients.read().get(&key).cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let https = build_https_connector(&self.options, key.clone())?;
        let client = build_client(&self.options, https);
        tracing::debug!(proxied = key.is_some(), "created connection pool");

        Ok(self.clients.write().entry(key).or_insert(client).clone())
    }
}

fn build_client(options: &SessionOptions, https: HttpsConnector<ProxyConnector>) -> PoolClient {
    let mut builder = Client::builder(TokioExecutor::new());

    // pool_timer is required for pool_idle_timeout to take effect.
    builder
        .pool_timer(TokioTimer::new())
        .http2_only(false)
        .pool_max_idle_per_host(if options.disable_keep_alives {
            0
        } else {
            options.pool_max_idle_per_host
        });

    if let Some(idle_timeout) = options.pool_idle_timeout {
        builder.pool_idle_timeout(idle_timeout);
    }

    builder.build::<_, Full<Bytes>>(https)
}

/// Plain `http` hops through a proxy carry the proxy credentials; `https`
/// hops authenticate on the `CONNECT` tunnel instead.
fn forward_proxy_auth(
    mut req: http::Request<Full<Bytes>>,
    auth: Option<&HeaderValue>,
) -> http::Request<Full<Bytes>> {
    if let Some(auth) = auth
        && req.uri().scheme() == Some(&Scheme::HTTP)
    {
        req.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
    }
    req
}

fn store_cookies(
    jar: &dyn CookieStore,
    url: &Url,
    cookies: &[Cookie<'_>],
) -> Result<(), HttpError> {
    let values = cookies
        .iter()
        .map(|c| HeaderValue::from_str(&c.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    jar.set_cookies(&mut values.iter(), url);
    Ok(())
}

/// Parse and validate an absolute `http`/`https` URL.
fn parse_url(raw: &str) -> Result<Url, HttpError> {
    let invalid = |kind, reason: String| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind,
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(InvalidUriKind::ParseError, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            InvalidUriKind::UnsupportedScheme,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(
            InvalidUriKind::MissingAuthority,
            "missing host".to_owned(),
        ));
    }
    Ok(url)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn session() -> Session {
        Session::with_options(SessionOptions::for_testing())
    }

    #[test]
    fn test_parse_url_classification() {
        assert!(matches!(
            parse_url("not a url"),
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::ParseError,
                ..
            })
        ));
        assert!(matches!(
            parse_url("ftp://example.com/file"),
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::UnsupportedScheme,
                ..
            })
        ));
        assert!(parse_url("https://example.com/").is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut session = session();
        session.set_base_url("http://example.com/api/");
        assert_eq!(session.base_url(), Some("http://example.com/api"));

        session.set_base_url("");
        assert_eq!(session.base_url(), None);
    }

    #[test]
    fn test_session_setters() {
        let mut session = session();
        session
            .set_header("x-a", "1")
            .unwrap()
            .set_header("x-a", "2")
            .unwrap()
            .set_user_agent("agent/1.0")
            .unwrap()
            .set_proxy("http://proxy.local:3128")
            .unwrap()
            .set_timeout(Duration::from_secs(3))
            .set_redirect_budget(2);

        assert_eq!(session.headers().get_all("x-a").iter().count(), 2);
        assert_eq!(session.user_agent(), Some("agent/1.0"));
        assert_eq!(
            session.proxy().map(Url::as_str),
            Some("http://proxy.local:3128/")
        );
        assert!(session.set_proxy("socks5://proxy.local").is_err());
        assert!(session.set_header("bad header", "v").is_err());

        session.set_header_single("x-a", "3").unwrap();
        assert_eq!(session.headers()["x-a"], "3");
    }

    #[test]
    fn test_proxy_auth_only_on_plain_http_hops() {
        let auth = HeaderValue::from_static("Basic dTpw");

        let plain = http::Request::builder()
            .uri("http://example.com/")
            .body(Full::default())
            .unwrap();
        let plain = forward_proxy_auth(plain, Some(&auth));
        assert_eq!(plain.headers()[PROXY_AUTHORIZATION], "Basic dTpw");

        let secure = http::Request::builder()
            .uri("https://example.com/")
            .body(Full::default())
            .unwrap();
        let secure = forward_proxy_auth(secure, Some(&auth));
        assert!(!secure.headers().contains_key(PROXY_AUTHORIZATION));
    }

    #[test]
    fn test_cookie_accessors_round_trip() {
        let session = session();
        session
            .set_cookies(
                "http://example.com/",
                &parse_cookie_string("a=1; b=2"),
            )
            .unwrap();

        let mut names: Vec<_> = session
            .cookies("http://example.com/")
            .unwrap()
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect();
        names.sort();
        assert_eq!(names, ["a=1", "b=2"]);
        assert!(session.cookies("http://other.example/").unwrap().is_empty());
    }

    #[test]
    fn test_cookies_without_jar_are_empty() {
        let session = Session::with_options(SessionOptions {
            disable_cookie_jar: true,
            ..SessionOptions::for_testing()
        });
        session
            .set_cookies("http://example.com/", &parse_cookie_string("a=1"))
            .unwrap();
        assert!(session.cookies("http://example.com/").unwrap().is_empty());
    }

    #[test]
    fn test_pools_are_cached_per_proxy() {
        let session = session();
        let proxy = ProxyTarget {
            uri: "http://proxy.local:3128".parse().unwrap(),
            auth: None,
        };

        session.client_for(None).unwrap();
        session.client_for(None).unwrap();
        session.client_for(Some(&proxy)).unwrap();

        assert_eq!(session.clients.read().len(), 2);
    }

    #[tokio::test]
    async fn test_deferred_error_is_returned_before_dispatch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200);
        });

        let mut request = Request::get(server.url("/"));
        request.set_header("bad header", "v");
        let err = session().transmit(request).await.unwrap_err();

        assert!(err.is_config());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_unencodable_json_body_is_config_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200);
        });

        let keyed = std::collections::BTreeMap::from([((1, 2), 3)]);
        let mut request = Request::post(server.url("/"));
        request.set_body_json(&keyed);
        let copied = request.copy();

        let err = session().transmit(request).await.unwrap_err();
        assert!(matches!(err, HttpError::BodyEncode(_)), "unexpected {err:?}");
        assert!(err.is_config());

        let err = session().transmit(copied).await.unwrap_err();
        assert!(err.is_config(), "copy keeps the class: {err:?}");
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_session_options_getter() {
        let session = Session::with_options(SessionOptions {
            max_body_size: 1024,
            ..SessionOptions::for_testing()
        });
        assert_eq!(session.session_options().max_body_size, 1024);
        assert!(format!("{session:?}").contains("redirect_check: false"));
    }

    #[tokio::test]
    async fn test_request_headers_win_over_session_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/h")
                .header("x-shared", "request")
                .header("x-session", "kept");
            then.status(200);
        });

        let mut session = session();
        session
            .set_header("x-shared", "session")
            .unwrap()
            .set_header("x-session", "kept")
            .unwrap();

        let mut request = Request::get(server.url("/h"));
        request.set_header("X-Shared", "request");
        let response = session.transmit(request).await.unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        mock.assert();
    }

    #[tokio::test]
    async fn test_default_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.header("user-agent", DEFAULT_USER_AGENT);
            then.status(204);
        });

        session().get(&server.url("/"), []).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_cookies_without_jar_go_in_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.header("cookie", "a=1; b=2");
            then.status(200);
        });

        let session = Session::with_options(SessionOptions {
            disable_cookie_jar: true,
            ..SessionOptions::for_testing()
        });
        let mut request = Request::get(server.url("/"));
        request.add_cookie_string("a=1; b=2");
        session.transmit(request).await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_trace_info_recorded() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.any_request();
            then.status(200).body("traced");
        });

        let mut session = session();
        session.enable_trace();
        let response = session.get(&server.url("/"), []).await.unwrap();

        let trace = response.trace_info().unwrap();
        assert!(trace.total_time >= trace.server_time);
        assert_eq!(trace.remote_addr, Some(*server.address()));
        assert!(trace.local_addr.is_some());
    }

    #[tokio::test]
    async fn test_host_override() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.header("host", "virtual.example");
            then.status(200);
        });

        let mut request = Request::get(server.url("/"));
        request.set_host("virtual.example");
        session().transmit(request).await.unwrap();

        mock.assert();
    }
}
