//! Relayed HTTP exchange model
//!
//! Represents one inbound call and the reply relayed back for it, plus the
//! transport-level request/response handed to the upstream client.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// HTTP methods the edge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Parse a method token; `None` for anything the edge does not relay
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// GET and HEAD never carry a body upstream
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Options => http::Method::OPTIONS,
        }
    }
}

impl TryFrom<&http::Method> for HttpMethod {
    type Error = ();

    fn try_from(method: &http::Method) -> Result<Self, Self::Error> {
        HttpMethod::parse(method.as_str()).ok_or(())
    }
}

/// One inbound call to the catch-all proxy route
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Path segments captured after the `/api/` prefix, empty ones included.
    /// No segments at all means the bare `/api` path.
    pub path_segments: Vec<String>,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Headers as received from the caller
    pub headers: HeaderMap,
    /// Request body (empty when the caller sent none)
    pub body: Bytes,
    /// Content type of the body, if declared
    pub content_type: Option<String>,
}

impl ProxyRequest {
    pub fn new(method: HttpMethod, path_segments: Vec<String>) -> Self {
        Self {
            method,
            path_segments,
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            content_type: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path relayed upstream, e.g. `/api/recipes/42`
    pub fn upstream_path(&self) -> String {
        if self.path_segments.is_empty() {
            return "/api".to_string();
        }
        format!("/api/{}", self.path_segments.join("/"))
    }
}

/// Relayed reply returned to the caller
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// HTTP status code
    pub status: u16,
    /// Canonical reason phrase, when known
    pub status_text: Option<String>,
    /// Filtered response headers (Set-Cookie kept multi-valued)
    pub headers: HeaderMap,
    /// Response body, untouched
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: http::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .map(str::to_string),
            headers,
            body: body.into(),
        }
    }

    /// Synthesized JSON reply (used for 502s and local errors)
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body as it goes out on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingBody {
    Empty,
    /// JSON and form-urlencoded payloads
    Text(String),
    /// Multipart and anything else, forwarded opaquely
    Binary(Bytes),
}

impl OutgoingBody {
    pub fn len(&self) -> usize {
        match self {
            OutgoingBody::Empty => 0,
            OutgoingBody::Text(text) => text.len(),
            OutgoingBody::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request handed to the upstream transport
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    /// Absolute URL including query string
    pub url: String,
    pub headers: HeaderMap,
    pub body: OutgoingBody,
}

/// Raw reply from the upstream transport
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_relayed_methods_only() {
        for token in ["get", "POST", "Put", "DELETE", "patch", "OPTIONS", "HEAD"] {
            assert!(HttpMethod::parse(token).is_some(), "{token} should parse");
        }
        assert_eq!(HttpMethod::parse("CONNECT"), None);
        assert_eq!(HttpMethod::parse("TRACE"), None);
    }

    #[test]
    fn with_headers_captures_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        let req = ProxyRequest::new(HttpMethod::Post, vec!["recipes".into()]).with_headers(headers);
        assert_eq!(req.content_type.as_deref(), Some("application/json"));
        assert_eq!(req.upstream_path(), "/api/recipes");
    }

    #[test]
    fn upstream_path_keeps_trailing_and_empty_segments() {
        let trailing = ProxyRequest::new(HttpMethod::Get, vec!["recipes".into(), String::new()]);
        assert_eq!(trailing.upstream_path(), "/api/recipes/");

        let doubled = ProxyRequest::new(
            HttpMethod::Get,
            vec![String::new(), "recipes".into()],
        );
        assert_eq!(doubled.upstream_path(), "/api//recipes");

        assert_eq!(ProxyRequest::new(HttpMethod::Get, Vec::new()).upstream_path(), "/api");
    }

    #[test]
    fn json_reply_sets_content_type() {
        let resp = ProxyResponse::json(502, &serde_json::json!({"detail": "x"}));
        assert_eq!(resp.status, 502);
        assert_eq!(resp.status_text.as_deref(), Some("Bad Gateway"));
        assert_eq!(
            resp.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
