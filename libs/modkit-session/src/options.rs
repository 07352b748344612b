//! Functional request options.
//!
//! Each constructor returns a [`RequestOption`] that mutates a [`Request`]
//! when applied. Options run in the order given; for any single field the
//! last one wins. Option values are encoded when the option is applied, and
//! an encoding failure is recorded on the request as a deferred error.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use cookie::Cookie;
use http::HeaderMap;
use serde::Serialize;

use crate::encode::FormData;
use crate::error::HttpError;
use crate::request::Request;

type ApplyFn = Box<dyn FnOnce(&mut Request) + Send>;

/// A deferred mutation of a [`Request`].
pub struct RequestOption(ApplyFn);

impl RequestOption {
    /// Wrap an arbitrary mutation.
    #[must_use]
    pub fn new(apply: impl FnOnce(&mut Request) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    pub(crate) fn apply(self, request: &mut Request) {
        (self.0)(request);
    }
}

impl fmt::Debug for RequestOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOption").finish_non_exhaustive()
    }
}

/// Apply `options` to `request` in order.
pub fn apply_options(request: &mut Request, options: impl IntoIterator<Item = RequestOption>) {
    for option in options {
        option.apply(request);
    }
}

/// Append a header value.
#[must_use]
pub fn header(name: impl Into<String>, value: impl Into<String>) -> RequestOption {
    let (name, value) = (name.into(), value.into());
    RequestOption::new(move |r| {
        r.set_header(&name, &value);
    })
}

/// Replace all values of a header.
#[must_use]
pub fn header_single(name: impl Into<String>, value: impl Into<String>) -> RequestOption {
    let (name, value) = (name.into(), value.into());
    RequestOption::new(move |r| {
        r.set_header_single(&name, &value);
    })
}

/// Merge a header map; names present in `headers` replace existing values.
#[must_use]
pub fn headers(headers: HeaderMap) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_headers(&headers);
    })
}

/// Append headers given as `"Name: value"` lines.
///
/// A line without `:` records [`HttpError::InvalidOption`].
#[must_use]
pub fn header_lines<I, S>(lines: I) -> RequestOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
    RequestOption::new(move |r| {
        for line in &lines {
            match line.split_once(':') {
                Some((name, value)) => {
                    r.set_header(name.trim(), value.trim());
                }
                None => r.record_error(HttpError::InvalidOption {
                    option: "header_lines",
                    reason: format!("expected 'Name: value', got '{line}'"),
                }),
            }
        }
    })
}

/// Merge query parameters into the URL.
#[must_use]
pub fn query<T: Serialize + Send + 'static>(query: T) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_query_string(&query);
    })
}

/// Raw body bytes; `Content-Type` is left to the caller.
#[must_use]
pub fn body(body: impl Into<Bytes>) -> RequestOption {
    let body = body.into();
    RequestOption::new(move |r| {
        r.set_body(body);
    })
}

#[must_use]
pub fn json<T: Serialize + Send + 'static>(value: T) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_body_json(&value);
    })
}

#[must_use]
pub fn xml<T: Serialize + Send + 'static>(value: T) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_body_xml(&value);
    })
}

/// `application/x-www-form-urlencoded` body.
#[must_use]
pub fn form<T: Serialize + Send + 'static>(value: T) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_body_form(&value);
    })
}

/// `multipart/form-data` body.
#[must_use]
pub fn form_data(form: FormData) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_body_form_data(&form);
    })
}

#[must_use]
pub fn basic_auth(user: impl Into<String>, password: impl Into<String>) -> RequestOption {
    let (user, password) = (user.into(), password.into());
    RequestOption::new(move |r| {
        r.set_basic_auth(&user, &password);
    })
}

/// Explicit `http://` proxy for this request.
#[must_use]
pub fn proxy(url: impl Into<String>) -> RequestOption {
    let url = url.into();
    RequestOption::new(move |r| {
        r.set_proxy_url(&url);
    })
}

#[must_use]
pub fn timeout(timeout: Duration) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_timeout(timeout);
    })
}

#[must_use]
pub fn redirect_budget(budget: usize) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_redirect_budget(budget);
    })
}

#[must_use]
pub fn cookies(cookies: Vec<Cookie<'static>>) -> RequestOption {
    RequestOption::new(move |r| {
        r.set_cookies(cookies);
    })
}

/// Cookies given as `"k=v; k2=v2"`; malformed pairs are dropped.
#[must_use]
pub fn cookie_string(raw: impl Into<String>) -> RequestOption {
    let raw = raw.into();
    RequestOption::new(move |r| {
        r.add_cookie_string(&raw);
    })
}

#[must_use]
pub fn referer(referer: impl Into<String>) -> RequestOption {
    let referer = referer.into();
    RequestOption::new(move |r| {
        r.set_referer(&referer);
    })
}

#[must_use]
pub fn user_agent(user_agent: impl Into<String>) -> RequestOption {
    let user_agent = user_agent.into();
    RequestOption::new(move |r| {
        r.set_user_agent(&user_agent);
    })
}

/// Override the `Host` header sent on the wire.
#[must_use]
pub fn host(host: impl Into<String>) -> RequestOption {
    let host = host.into();
    RequestOption::new(move |r| {
        r.set_host(host);
    })
}

/// Record [`TraceInfo`](crate::TraceInfo) for this request.
#[must_use]
pub fn trace() -> RequestOption {
    RequestOption::new(|r| {
        r.enable_trace();
    })
}
