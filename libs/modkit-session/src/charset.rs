//! Response body character encoding detection and transcoding.

use std::borrow::Cow;
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;

/// Number of leading body bytes inspected when sniffing the encoding.
pub const SNIFF_WINDOW: usize = 1024;

static META_CHARSET: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+?charset\s*=\s*["']?\s*([a-z0-9_:.+\-]+)"#).ok()
});

static XML_ENCODING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)^\s*<\?xml[^>]+?encoding\s*=\s*["']([a-z0-9_:.+\-]+)["']"#).ok()
});

/// Determine the encoding of a body from its first bytes.
///
/// Order of evidence: byte order mark, `charset` parameter of `content_type`,
/// a `<meta>` or `<?xml?>` declaration inside [`SNIFF_WINDOW`]. Anything
/// inconclusive yields UTF-8.
#[must_use]
pub fn sniff(body: &[u8], content_type: Option<&str>) -> &'static Encoding {
    let window = &body[..body.len().min(SNIFF_WINDOW)];

    if let Some((encoding, _)) = Encoding::for_bom(window) {
        return encoding;
    }

    if let Some(encoding) = content_type.and_then(charset_from_content_type) {
        return encoding;
    }

    if let Some(encoding) = declared_in_document(window) {
        return encoding;
    }

    UTF_8
}

fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    let mime: mime::Mime = content_type.parse().ok()?;
    let charset = mime.get_param(mime::CHARSET)?;
    Encoding::for_label(charset.as_str().trim_matches('"').as_bytes())
}

fn declared_in_document(window: &[u8]) -> Option<&'static Encoding> {
    let label = [&*XML_ENCODING, &*META_CHARSET]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(window))
        .and_then(|caps| caps.get(1))?;

    // A document cannot declare itself UTF-16 in ASCII; treat it as UTF-8.
    Encoding::for_label(label.as_bytes()).map(Encoding::output_encoding)
}

/// Transcode `body` from `encoding` to UTF-8.
///
/// UTF-8 input is returned unchanged, byte for byte. Other encodings drop
/// their own byte order mark and replace malformed sequences with U+FFFD.
#[must_use]
pub fn transcode<'a>(body: &'a [u8], encoding: &'static Encoding) -> Cow<'a, [u8]> {
    if encoding == UTF_8 {
        return Cow::Borrowed(body);
    }
    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::trace!(encoding = encoding.name(), "malformed input replaced while transcoding");
    }
    match text {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}
