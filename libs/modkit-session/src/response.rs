use std::io;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use encoding_rs::Encoding;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, StatusCode, Uri, Version};
use http_body::Body;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

use crate::charset;
use crate::error::{BoxError, HttpError};

/// Maximum number of body bytes quoted in [`HttpError::HttpStatus`].
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports two formats per RFC 7231:
/// - Seconds: "120" → 120 seconds
/// - HTTP-date (RFC 1123): "Wed, 21 Oct 2015 07:28:00 GMT" → duration until that time
///
/// Returns `None` if the header is missing, unparsable, or in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Timing and connection details recorded when tracing is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceInfo {
    /// Dispatch until response headers arrived (includes connect and redirects).
    pub server_time: Duration,
    /// Response headers until the body was fully buffered.
    pub response_time: Duration,
    /// Whole transmission.
    pub total_time: Duration,
    /// Peer address of the final connection (the proxy when proxied).
    pub remote_addr: Option<SocketAddr>,
    /// Local address of the final connection.
    pub local_addr: Option<SocketAddr>,
}

/// Fully buffered, decoded response.
///
/// The body is held in memory; [`std::io::Read`] is implemented as a cursor
/// over it for callers that want to consume it as a stream.
#[derive(Debug)]
pub struct Response {
    request_id: u64,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    content_length: Option<u64>,
    transfer_encoding: Vec<String>,
    encoding: &'static Encoding,
    exec_time: Duration,
    trace: Option<TraceInfo>,
    url: Option<Uri>,
    cursor: usize,
}

/// Buffer and decode a raw response.
///
/// The first [`SNIFF_WINDOW`](charset::SNIFF_WINDOW) bytes select the
/// encoding, then the whole body is transcoded to UTF-8. Timing fields are
/// left empty for the caller to fill.
///
/// # Errors
/// - [`HttpError::BodyTooLarge`] if the body exceeds `max_body_size`
/// - [`HttpError::Decode`] if reading the body fails
pub async fn decode<B>(raw: http::Response<B>, max_body_size: usize) -> Result<Response, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (parts, body) = raw.into_parts();
    let raw_body = read_body_limited(body, max_body_size).await?;

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let encoding = charset::sniff(&raw_body, content_type);
    tracing::trace!(encoding = encoding.name(), "sniffed response encoding");

    let transcoded = match charset::transcode(&raw_body, encoding) {
        std::borrow::Cow::Borrowed(_) => None,
        std::borrow::Cow::Owned(decoded) => Some(decoded),
    };
    let body = transcoded.map_or(raw_body, Bytes::from);

    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    let transfer_encoding = parts
        .headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();

    Ok(Response {
        request_id: 0,
        status: parts.status,
        version: parts.version,
        headers: parts.headers,
        body,
        content_length,
        transfer_encoding,
        encoding,
        exec_time: Duration::ZERO,
        trace: None,
        url: None,
        cursor: 0,
    })
}

/// Read a body to completion, failing once more than `limit` bytes arrive.
///
/// The limit applies after decompression, which protects against
/// decompression bombs.
///
/// # Errors
/// - [`HttpError::BodyTooLarge`] once the limit is exceeded
/// - [`HttpError::Decode`] if a frame fails to arrive
pub async fn read_body_limited<B>(body: B, limit: usize) -> Result<Bytes, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| HttpError::Decode(e.into()))?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

impl Response {
    pub(crate) fn finish(
        mut self,
        request_id: u64,
        exec_time: Duration,
        url: Option<Uri>,
        trace: Option<TraceInfo>,
    ) -> Self {
        self.request_id = request_id;
        self.exec_time = exec_time;
        self.url = url;
        self.trace = trace;
        self
    }

    /// Identity of the request that produced this response.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status line such as `"200 OK"`.
    #[must_use]
    pub fn status_line(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// `Content-Length` as announced by the server. `None` when absent,
    /// e.g. for chunked or compressed responses.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[must_use]
    pub fn transfer_encoding(&self) -> &[String] {
        &self.transfer_encoding
    }

    /// Encoding the body was sniffed as, before transcoding to UTF-8.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Time from dispatch to fully buffered body.
    #[must_use]
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    #[must_use]
    pub fn trace_info(&self) -> Option<&TraceInfo> {
        self.trace.as_ref()
    }

    /// URL of the final hop, after redirects.
    #[must_use]
    pub fn url(&self) -> Option<&Uri> {
        self.url.as_ref()
    }

    /// Decoded body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Decoded body as text; invalid UTF-8 is replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body with HTML/XML character references unescaped.
    #[must_use]
    pub fn html_unescaped(&self) -> String {
        let text = self.text();
        let unescaped = quick_xml::escape::unescape(&text).map(std::borrow::Cow::into_owned);
        unescaped.unwrap_or(text)
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns [`HttpError::Json`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Deserialize the body as XML.
    ///
    /// # Errors
    /// Returns [`HttpError::Xml`] if the body is not valid XML for `T`.
    pub fn xml<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let text = std::str::from_utf8(&self.body).map_err(HttpError::xml)?;
        quick_xml::de::from_str(text).map_err(HttpError::xml)
    }

    /// Turn a non-2xx status into [`HttpError::HttpStatus`].
    ///
    /// # Errors
    /// Returns [`HttpError::HttpStatus`] with a body preview and any
    /// `Retry-After` hint when the status is not successful.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let preview_len = self.body.len().min(ERROR_BODY_PREVIEW_LIMIT);
        Err(HttpError::HttpStatus {
            status: self.status,
            body_preview: String::from_utf8_lossy(&self.body[..preview_len]).into_owned(),
            content_type: self.content_type().map(str::to_owned),
            retry_after: parse_retry_after(&self.headers),
        })
    }
}

impl io::Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.body[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }
}
