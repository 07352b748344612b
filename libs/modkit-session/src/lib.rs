#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Session-oriented HTTP client for `ModKit`
//!
//! A [`Session`] holds long-lived defaults (base URL, headers, proxy,
//! timeout, redirect budget, cookie jar, middleware). Each [`Request`] can
//! override them, either through its setters or through functional
//! [`options`]. Transmission resolves the layers once into a
//! [`PolicyContext`] with the precedence request > session > built-in
//! default, runs the middleware chain and performs the exchange:
//! - Automatic TLS via rustls (webpki or native roots)
//! - HTTP proxies from the request, the session, a custom selector or the
//!   environment,
//!   with `CONNECT` tunnelling for `https`
//! - Redirects followed up to the resolved budget, with cookies kept per hop
//! - **Transparent response decompression** (gzip, brotli, deflate)
//! - Bodies fully buffered and transcoded to UTF-8 from the sniffed charset
//!
//! Nothing is retried automatically.
//!
//! # Example
//!
//! ```ignore
//! use modkit_session::{Session, options};
//! use std::time::Duration;
//!
//! let mut session = Session::new();
//! session
//!     .set_base_url("https://example.com/api")
//!     .set_timeout(Duration::from_secs(10));
//!
//! let response = session
//!     .post("/items", [options::json(item), options::header("x-trace", "1")])
//!     .await?
//!     .error_for_status()?;
//! println!("{} in {:?}", response.status_line(), response.exec_time());
//! ```

pub mod charset;
mod config;
mod connector;
pub mod cookies;
pub mod encode;
mod error;
pub mod global;
mod middleware;
pub mod options;
mod policy;
mod proxy;
mod redirect;
mod request;
mod response;
mod session;
mod tls;

pub use config::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_REDIRECT_BUDGET, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
    RedirectConfig, SessionOptions, TlsRootConfig,
};
pub use cookies::{CookieLayer, CookieStore, Jar, parse_cookie_string};
pub use encode::{BodyEncoder, EncodedBody, FormData};
pub use error::{BoxError, HttpError, InvalidUriKind};
pub use global::default_session;
pub use middleware::{Middleware, MiddlewareChain, Outbound};
pub use options::{RequestOption, apply_options};
pub use policy::{PolicyContext, PolicyDefaults};
pub use proxy::{ProxySelector, ProxyTarget, parse_proxy_url};
pub use redirect::{RedirectBudget, RedirectCheck, RedirectHop};
pub use request::Request;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, Response, TraceInfo, decode, parse_retry_after};
pub use session::Session;

pub use cookie::Cookie;
