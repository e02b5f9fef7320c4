//! Minimal multipart/form-data reader for the share target
//!
//! Only what the share sheet sends is supported: find one named file field
//! and hand back its bytes untouched. Part headers are parsed with httparse.

use bytes::Bytes;
use thiserror::Error;

use crate::models::SharedImage;

const MAX_PART_HEADERS: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("content type carries no multipart boundary")]
    MissingBoundary,
    #[error("body does not start with the multipart boundary")]
    MissingDelimiter,
    #[error("multipart body ended inside a part")]
    Unterminated,
    #[error("invalid part headers: {0}")]
    PartHeaders(String),
}

/// Boundary token from a `multipart/form-data; boundary=...` content type
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|boundary| !boundary.is_empty())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `name` and `filename` parameters of a Content-Disposition value
fn disposition_params(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut file_name = None;
    for param in value.split(';').skip(1) {
        if let Some((key, val)) = param.split_once('=') {
            let val = val.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(val),
                "filename" => file_name = Some(val),
                _ => {}
            }
        }
    }
    (name, file_name)
}

/// Pull the part named `field` out of a multipart body.
///
/// Returns `Ok(None)` when the body is well-formed but has no such field.
pub fn extract_file_field(
    body: &Bytes,
    boundary: &str,
    field: &str,
) -> Result<Option<SharedImage>, MultipartError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let next_delimiter = format!("\r\n--{}", boundary).into_bytes();

    let mut pos = find(body, &delimiter).ok_or(MultipartError::MissingDelimiter)?;
    loop {
        pos += delimiter.len();
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(None);
        }
        let line_end = find(rest, b"\r\n").ok_or(MultipartError::Unterminated)?;
        let part_start = pos + line_end + 2;

        let part_len =
            find(&body[part_start..], &next_delimiter).ok_or(MultipartError::Unterminated)?;
        let part = &body[part_start..part_start + part_len];

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (header_len, parsed) = match httparse::parse_headers(part, &mut headers) {
            Ok(httparse::Status::Complete(done)) => done,
            Ok(httparse::Status::Partial) => {
                return Err(MultipartError::PartHeaders("incomplete header block".into()))
            }
            Err(e) => return Err(MultipartError::PartHeaders(e.to_string())),
        };

        let header = |wanted: &str| {
            parsed
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(wanted))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .map(str::to_string)
        };

        let (name, file_name) = header("content-disposition")
            .map(|value| disposition_params(&value))
            .unwrap_or_default();

        if name.as_deref() == Some(field) {
            let data_start = part_start + header_len;
            return Ok(Some(SharedImage {
                data: body.slice(data_start..part_start + part_len),
                content_type: header("content-type"),
                file_name,
            }));
        }

        pos = part_start + part_len + 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----edgeBoundary7MA4YWxk";

    fn body(parts: &[(&str, Option<&str>, &[u8])]) -> Bytes {
        let mut out = Vec::new();
        for (name, file_name, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        Bytes::from(out)
    }

    #[test]
    fn boundary_is_read_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; boundary=\"q q\"")
                .as_deref(),
            Some("q q")
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
    }

    #[test]
    fn extracts_named_file_with_binary_bytes() {
        let png: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x00, 0xff];
        let body = body(&[("title", None, &b"hello"[..]), ("image", Some("drink.png"), png)]);

        let image = extract_file_field(&body, BOUNDARY, "image")
            .unwrap()
            .expect("image part");

        assert_eq!(image.data.as_ref(), png);
        assert_eq!(image.content_type.as_deref(), Some("image/png"));
        assert_eq!(image.file_name.as_deref(), Some("drink.png"));
    }

    #[test]
    fn empty_file_part_is_an_empty_payload() {
        let body = body(&[("image", Some("empty.png"), &b""[..])]);
        let image = extract_file_field(&body, BOUNDARY, "image").unwrap().unwrap();
        assert!(image.data.is_empty());
    }

    #[test]
    fn missing_field_is_none() {
        let body = body(&[("title", None, &b"hello"[..])]);
        assert_eq!(extract_file_field(&body, BOUNDARY, "image").unwrap(), None);
    }

    #[test]
    fn garbage_is_rejected() {
        let body = Bytes::from_static(b"not a multipart body");
        assert_eq!(
            extract_file_field(&body, BOUNDARY, "image"),
            Err(MultipartError::MissingDelimiter)
        );

        let truncated = Bytes::from(format!(
            "--{}\r\nContent-Disposition: form-data; name=\"image\"\r\n\r\nabc",
            BOUNDARY
        ));
        assert_eq!(
            extract_file_field(&truncated, BOUNDARY, "image"),
            Err(MultipartError::Unterminated)
        );
    }
}
