//! Request body encoders.
//!
//! Each encoder turns a value into bytes plus the `Content-Type` that
//! describes them. Requests only see the [`BodyEncoder`] contract.

use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderValue;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;

use crate::error::HttpError;

/// Encoded request body.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub content_type: HeaderValue,
    pub bytes: Bytes,
}

/// Serializes a value into a request body.
pub trait BodyEncoder {
    /// # Errors
    /// Returns an error if the value cannot be represented in the target format.
    fn encode(&self) -> Result<EncodedBody, HttpError>;
}

/// `application/json` body.
#[derive(Debug)]
pub struct Json<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> BodyEncoder for Json<'_, T> {
    fn encode(&self) -> Result<EncodedBody, HttpError> {
        let bytes = serde_json::to_vec(self.0).map_err(HttpError::body_encode)?;
        Ok(EncodedBody {
            content_type: HeaderValue::from_static("application/json"),
            bytes: bytes.into(),
        })
    }
}

/// `application/xml` body.
#[derive(Debug)]
pub struct Xml<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> BodyEncoder for Xml<'_, T> {
    fn encode(&self) -> Result<EncodedBody, HttpError> {
        let xml = quick_xml::se::to_string(self.0).map_err(HttpError::body_encode)?;
        Ok(EncodedBody {
            content_type: HeaderValue::from_static("application/xml; charset=utf-8"),
            bytes: xml.into(),
        })
    }
}

/// `application/x-www-form-urlencoded` body.
#[derive(Debug)]
pub struct UrlEncoded<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> BodyEncoder for UrlEncoded<'_, T> {
    fn encode(&self) -> Result<EncodedBody, HttpError> {
        let form = serde_urlencoded::to_string(self.0)?;
        Ok(EncodedBody {
            content_type: HeaderValue::from_static("application/x-www-form-urlencoded"),
            bytes: form.into(),
        })
    }
}

#[derive(Debug, Clone)]
enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: mime::Mime,
        data: Bytes,
    },
}

/// `multipart/form-data` body built from text fields and files.
///
/// ```ignore
/// let form = FormData::new()
///     .text("title", "report")
///     .file("upload", "report.csv", csv_bytes);
/// request.set_body_form_data(&form);
/// ```
#[derive(Debug, Clone)]
pub struct FormData {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl FormData {
    /// Create an empty form with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        let boundary: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        Self {
            boundary,
            parts: Vec::new(),
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Add a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a file field sent as `application/octet-stream`.
    #[must_use]
    pub fn file(
        self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.file_with_type(name, file_name, mime::APPLICATION_OCTET_STREAM, data)
    }

    /// Add a file field with an explicit content type.
    #[must_use]
    pub fn file_with_type(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: mime::Mime,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part::File {
            name: name.into(),
            file_name: file_name.into(),
            content_type,
            data: data.into(),
        });
        self
    }
}

impl BodyEncoder for FormData {
    fn encode(&self) -> Result<EncodedBody, HttpError> {
        let mut out = BytesMut::new();

        for part in &self.parts {
            let head = match part {
                Part::Text { name, .. } => format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    self.boundary,
                    escape_quotes(name)
                ),
                Part::File {
                    name,
                    file_name,
                    content_type,
                    ..
                } => format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {content_type}\r\n\r\n",
                    self.boundary,
                    escape_quotes(name),
                    escape_quotes(file_name)
                ),
            };
            out.put_slice(head.as_bytes());
            match part {
                Part::Text { value, .. } => out.put_slice(value.as_bytes()),
                Part::File { data, .. } => out.put_slice(data),
            }
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        let content_type =
            HeaderValue::from_str(&format!("multipart/form-data; boundary={}", self.boundary))?;
        Ok(EncodedBody {
            content_type,
            bytes: out.freeze(),
        })
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Login<'a> {
        user: &'a str,
        remember: bool,
    }

    #[test]
    fn test_json_encoder() {
        let encoded = Json(&Login {
            user: "ada",
            remember: true,
        })
        .encode()
        .unwrap();

        assert_eq!(encoded.content_type, "application/json");
        assert_eq!(encoded.bytes.as_ref(), br#"{"user":"ada","remember":true}"#);
    }

    #[test]
    fn test_urlencoded_encoder() {
        let mut fields = BTreeMap::new();
        fields.insert("a", "1 2");
        fields.insert("b", "x&y");

        let encoded = UrlEncoded(&fields).encode().unwrap();
        assert_eq!(encoded.content_type, "application/x-www-form-urlencoded");
        assert_eq!(encoded.bytes.as_ref(), b"a=1+2&b=x%26y");
    }

    #[test]
    fn test_urlencoded_rejects_nested_values() {
        let nested = BTreeMap::from([("a", vec![vec![1_u8]])]);
        let err = UrlEncoded(&nested).encode().unwrap_err();
        assert!(matches!(err, HttpError::FormEncode(_)));
    }

    #[test]
    fn test_json_rejects_non_string_keys() {
        let keyed = BTreeMap::from([((1, 2), 3)]);
        let err = Json(&keyed).encode().unwrap_err();
        assert!(matches!(err, HttpError::BodyEncode(_)));
        assert!(err.is_config());
    }

    #[test]
    fn test_xml_encoder() {
        let encoded = Xml(&Login {
            user: "ada",
            remember: false,
        })
        .encode()
        .unwrap();

        let text = std::str::from_utf8(&encoded.bytes).unwrap();
        assert!(text.starts_with("<Login>"));
        assert!(text.contains("<user>ada</user>"));
        assert!(
            encoded
                .content_type
                .to_str()
                .unwrap()
                .starts_with("application/xml")
        );
    }

    #[test]
    fn test_multipart_layout() {
        let form = FormData::new()
            .text("title", "report")
            .file("upload", "a\"b.csv", Bytes::from_static(b"x,y\n1,2\n"));
        let boundary = form.boundary().to_owned();
        let encoded = form.encode().unwrap();

        assert_eq!(
            encoded.content_type.to_str().unwrap(),
            format!("multipart/form-data; boundary={boundary}")
        );

        let body = String::from_utf8(encoded.bytes.to_vec()).unwrap();
        let expected = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a\\\"b.csv\"\r\n\
             Content-Type: application/octet-stream\r\n\r\nx,y\n1,2\n\r\n\
             --{boundary}--\r\n"
        );
        assert_eq!(body, expected);
    }

    #[test]
    fn test_boundaries_differ() {
        assert_ne!(FormData::new().boundary(), FormData::new().boundary());
    }
}
