//! Process-wide default session.
//!
//! A thin convenience over an ordinary [`Session`] built with default
//! options. Code that needs its own headers, proxy or middleware should own
//! a `Session` instead; the default one cannot be reconfigured.

use std::sync::OnceLock;

use crate::error::HttpError;
use crate::options::RequestOption;
use crate::response::Response;
use crate::session::Session;

static DEFAULT_SESSION: OnceLock<Session> = OnceLock::new();

/// The shared default session, created on first use.
#[must_use]
pub fn default_session() -> &'static Session {
    DEFAULT_SESSION.get_or_init(Session::new)
}

/// `GET` through the default session.
///
/// # Errors
/// See [`Session::transmit`].
pub async fn get(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().get(url, options).await
}

/// # Errors
/// See [`Session::transmit`].
pub async fn post(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().post(url, options).await
}

/// # Errors
/// See [`Session::transmit`].
pub async fn put(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().put(url, options).await
}

/// # Errors
/// See [`Session::transmit`].
pub async fn patch(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().patch(url, options).await
}

/// # Errors
/// See [`Session::transmit`].
pub async fn delete(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().delete(url, options).await
}

/// # Errors
/// See [`Session::transmit`].
pub async fn head(
    url: &str,
    options: impl IntoIterator<Item = RequestOption>,
) -> Result<Response, HttpError> {
    default_session().head(url, options).await
}
