//! Generic reverse-proxy handler
//!
//! Relays any method to the backend origin resolved for this call, applies
//! the header policy in both directions and converts transport failures into
//! a synthesized 502.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::models::{
    HttpMethod, OutgoingBody, ProxyRequest, ProxyResponse, UpstreamRequest, UpstreamResponse,
};
use crate::proxy::headers::{outgoing_request_headers, outgoing_response_headers};
use crate::proxy::origin::{resolve_origin, BuildMode, EnvSource, ProcessEnv};
use crate::proxy::upstream::{UpstreamClient, UpstreamError};

/// Body of the synthesized reply when the backend cannot be reached
pub const BACKEND_UNAVAILABLE_DETAIL: &str = "Backend service unavailable";

/// Reverse-proxy handler for the catch-all API route
pub struct EdgeProxy<C> {
    client: Arc<C>,
    env: Arc<dyn EnvSource>,
    mode: BuildMode,
}

impl<C> Clone for EdgeProxy<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            env: Arc::clone(&self.env),
            mode: self.mode,
        }
    }
}

impl<C: UpstreamClient> EdgeProxy<C> {
    pub fn new(client: Arc<C>, mode: BuildMode) -> Self {
        Self::with_env(client, Arc::new(ProcessEnv), mode)
    }

    pub fn with_env(client: Arc<C>, env: Arc<dyn EnvSource>, mode: BuildMode) -> Self {
        Self { client, env, mode }
    }

    /// Relay one call to the backend.
    ///
    /// Never fails: upstream application errors pass through verbatim and
    /// transport errors become a 502. No retry is attempted here.
    pub async fn relay(&self, request: ProxyRequest) -> ProxyResponse {
        let request_id = Uuid::new_v4();
        self.relay_once(request)
            .instrument(tracing::info_span!("relay", %request_id))
            .await
    }

    async fn relay_once(&self, request: ProxyRequest) -> ProxyResponse {
        let origin = resolve_origin(self.env.as_ref(), self.mode);
        let path = request.upstream_path();
        let url = origin.url_for(&path, request.query.as_deref());
        let method = request.method;

        let upstream_request = UpstreamRequest {
            method,
            url,
            headers: outgoing_request_headers(&request.headers),
            body: classify_body(method, request.content_type.as_deref(), request.body),
        };

        tracing::debug!(
            method = %method,
            path = %path,
            origin = %origin.origin,
            body_size = upstream_request.body.len(),
            "Relaying request"
        );

        let start = Instant::now();
        match self.client.send(upstream_request).await {
            Ok(upstream) => {
                let response = relay_response(upstream);
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = response.status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request relayed"
                );
                response
            }
            Err(err) => {
                log_upstream_failure(method, &path, &origin.origin, &err);
                backend_unavailable()
            }
        }
    }
}

/// Pick the wire form of the body from the declared content type.
///
/// Multipart stays opaque bytes so the boundary in the content-type header
/// still matches; JSON and urlencoded forms go as text; anything else with a
/// body goes as bytes. GET and HEAD never send one.
pub fn classify_body(
    method: HttpMethod,
    content_type: Option<&str>,
    body: bytes::Bytes,
) -> OutgoingBody {
    if !method.allows_body() || body.is_empty() {
        return OutgoingBody::Empty;
    }

    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.starts_with("multipart/form-data") {
        return OutgoingBody::Binary(body);
    }
    if content_type.contains("application/json")
        || content_type.contains("application/x-www-form-urlencoded")
    {
        return match String::from_utf8(body.to_vec()) {
            Ok(text) => OutgoingBody::Text(text),
            Err(_) => OutgoingBody::Binary(body),
        };
    }
    OutgoingBody::Binary(body)
}

/// Turn a raw upstream reply into the caller-facing response.
///
/// Redirects are not followed upstream, so a 3xx arrives here with its
/// Location header intact and is passed on as-is.
pub fn relay_response(upstream: UpstreamResponse) -> ProxyResponse {
    ProxyResponse::new(
        upstream.status,
        outgoing_response_headers(&upstream.headers),
        upstream.body,
    )
}

/// Synthesized reply for an unreachable backend
pub fn backend_unavailable() -> ProxyResponse {
    ProxyResponse::json(502, &json!({ "detail": BACKEND_UNAVAILABLE_DETAIL }))
}

pub(crate) fn log_upstream_failure(method: HttpMethod, path: &str, origin: &str, err: &UpstreamError) {
    match err {
        UpstreamError::Timeout(_) | UpstreamError::Connect(_) => tracing::warn!(
            method = %method,
            path = %path,
            origin = %origin,
            error = %err,
            "Backend unreachable"
        ),
        _ => tracing::error!(
            method = %method,
            path = %path,
            origin = %origin,
            error = %err,
            "Upstream request failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::origin::BACKEND_URL_VAR;
    use crate::proxy::upstream::testing::{ok_response, RecordingUpstream};
    use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
    use http::{HeaderMap, HeaderValue};
    use std::collections::HashMap;

    fn proxy_for(upstream: &RecordingUpstream) -> EdgeProxy<RecordingUpstream> {
        let mut env = HashMap::new();
        env.insert(BACKEND_URL_VAR.to_string(), "http://backend.test".to_string());
        EdgeProxy::with_env(
            Arc::new(upstream.clone()),
            Arc::new(env),
            BuildMode::Production,
        )
    }

    fn segments(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    #[tokio::test]
    async fn method_is_relayed_unchanged() {
        let upstream = RecordingUpstream::replying(ok_response(200, "{}"));
        let proxy = proxy_for(&upstream);

        for method in [
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Delete,
            HttpMethod::Patch,
            HttpMethod::Options,
        ] {
            proxy
                .relay(ProxyRequest::new(method, segments("recipes")))
                .await;
            assert_eq!(upstream.last_request().method, method);
        }
    }

    #[tokio::test]
    async fn path_and_query_are_preserved() {
        let upstream = RecordingUpstream::replying(ok_response(200, "[]"));
        let proxy = proxy_for(&upstream);

        proxy
            .relay(
                ProxyRequest::new(HttpMethod::Get, segments("recipes")).with_query("search=gin&limit=5"),
            )
            .await;

        assert_eq!(
            upstream.last_request().url,
            "http://backend.test/api/recipes?search=gin&limit=5"
        );
    }

    #[tokio::test]
    async fn origin_is_resolved_per_request() {
        let upstream = RecordingUpstream::replying(ok_response(200, "{}"));
        let env = Arc::new(std::sync::RwLock::new(HashMap::new()));

        struct SharedEnv(Arc<std::sync::RwLock<HashMap<String, String>>>);
        impl EnvSource for SharedEnv {
            fn var(&self, key: &str) -> Option<String> {
                self.0.read().unwrap().get(key).cloned()
            }
        }

        let proxy = EdgeProxy::with_env(
            Arc::new(upstream.clone()),
            Arc::new(SharedEnv(env.clone())),
            BuildMode::Development,
        );

        proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("categories")))
            .await;
        assert!(upstream
            .last_request()
            .url
            .starts_with("http://localhost:8000/api/categories"));

        env.write()
            .unwrap()
            .insert(BACKEND_URL_VAR.to_string(), "http://moved.test".to_string());
        proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("categories")))
            .await;
        assert_eq!(upstream.last_request().url, "http://moved.test/api/categories");
    }

    #[tokio::test]
    async fn credentials_and_policy_applied_to_outgoing_headers() {
        let upstream = RecordingUpstream::replying(ok_response(200, "{}"));
        let proxy = proxy_for(&upstream);

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("edge.local"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert(COOKIE, HeaderValue::from_static("session=abc123"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));

        proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("auth/me")).with_headers(headers))
            .await;

        let sent = upstream.last_request().headers;
        assert!(!sent.contains_key("host"));
        assert!(!sent.contains_key("connection"));
        assert_eq!(sent.get(COOKIE).unwrap(), "session=abc123");
        assert_eq!(sent.get(AUTHORIZATION).unwrap(), "Bearer t0k");
    }

    #[tokio::test]
    async fn multipart_body_goes_out_as_opaque_bytes() {
        let upstream = RecordingUpstream::replying(ok_response(201, "{}"));
        let proxy = proxy_for(&upstream);

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=XyZ"),
        );
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\n\xff\xd8\r\n--XyZ--\r\n".to_vec();

        proxy
            .relay(
                ProxyRequest::new(HttpMethod::Post, segments("upload"))
                    .with_headers(headers)
                    .with_body(body.clone()),
            )
            .await;

        let sent = upstream.last_request();
        assert_eq!(sent.body, OutgoingBody::Binary(body.into()));
        assert_eq!(
            sent.headers.get(CONTENT_TYPE).unwrap(),
            "multipart/form-data; boundary=XyZ"
        );
    }

    #[test]
    fn body_classification_follows_content_type() {
        let json = bytes::Bytes::from_static(br#"{"name":"Negroni"}"#);
        assert_eq!(
            classify_body(HttpMethod::Post, Some("application/json"), json.clone()),
            OutgoingBody::Text(r#"{"name":"Negroni"}"#.into())
        );
        assert_eq!(
            classify_body(
                HttpMethod::Put,
                Some("application/x-www-form-urlencoded"),
                bytes::Bytes::from_static(b"a=1&b=2")
            ),
            OutgoingBody::Text("a=1&b=2".into())
        );
        assert_eq!(
            classify_body(HttpMethod::Post, Some("image/png"), bytes::Bytes::from_static(b"\x89PNG")),
            OutgoingBody::Binary(bytes::Bytes::from_static(b"\x89PNG"))
        );
        assert_eq!(
            classify_body(HttpMethod::Get, Some("application/json"), json.clone()),
            OutgoingBody::Empty
        );
        assert_eq!(
            classify_body(HttpMethod::Head, None, json),
            OutgoingBody::Empty
        );
        assert_eq!(
            classify_body(HttpMethod::Delete, None, bytes::Bytes::new()),
            OutgoingBody::Empty
        );
    }

    #[tokio::test]
    async fn repeated_set_cookie_headers_survive() {
        let mut reply = ok_response(200, "{}");
        reply
            .headers
            .append(SET_COOKIE, HeaderValue::from_static("access=a; HttpOnly"));
        reply
            .headers
            .append(SET_COOKIE, HeaderValue::from_static("refresh=r; HttpOnly"));
        reply
            .headers
            .insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let upstream = RecordingUpstream::replying(reply);
        let proxy = proxy_for(&upstream);

        let response = proxy
            .relay(ProxyRequest::new(HttpMethod::Post, segments("auth/login")))
            .await;

        let cookies: Vec<_> = response.headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["access=a; HttpOnly", "refresh=r; HttpOnly"]);
        assert!(!response.headers.contains_key("transfer-encoding"));
    }

    #[tokio::test]
    async fn redirects_are_relayed_not_followed() {
        let mut reply = ok_response(307, "");
        reply
            .headers
            .insert(LOCATION, HeaderValue::from_static("/api/recipes/"));
        let upstream = RecordingUpstream::replying(reply);
        let proxy = proxy_for(&upstream);

        let response = proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("recipes")))
            .await;

        assert_eq!(response.status, 307);
        assert_eq!(response.headers.get(LOCATION).unwrap(), "/api/recipes/");
        assert_eq!(upstream.request_count(), 1);
    }

    #[tokio::test]
    async fn backend_errors_pass_through_verbatim() {
        let upstream = RecordingUpstream::replying(ok_response(404, r#"{"detail":"Recipe not found"}"#));
        let proxy = proxy_for(&upstream);

        let response = proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("recipes/missing")))
            .await;

        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], br#"{"detail":"Recipe not found"}"#);
    }

    #[tokio::test]
    async fn transport_failure_becomes_502() {
        let upstream = RecordingUpstream::failing(UpstreamError::Connect("connection refused".into()));
        let proxy = proxy_for(&upstream);

        let response = proxy
            .relay(ProxyRequest::new(HttpMethod::Get, segments("recipes")))
            .await;

        assert_eq!(response.status, 502);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, serde_json::json!({"detail": "Backend service unavailable"}));
        assert_eq!(upstream.request_count(), 1, "no retry inside the relay");
    }

    #[tokio::test]
    async fn timeout_folds_into_the_same_502() {
        let upstream = RecordingUpstream::failing(UpstreamError::Timeout("30s elapsed".into()));
        let proxy = proxy_for(&upstream);

        let response = proxy
            .relay(ProxyRequest::new(HttpMethod::Post, segments("recipes")))
            .await;

        assert_eq!(response.status, 502);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
