//! Liveness probe relay
//!
//! A single-endpoint relay: GET only, no body, never cacheable.

use std::sync::Arc;

use http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use http::{HeaderMap, HeaderValue};
use serde_json::json;

use crate::models::{HttpMethod, OutgoingBody, ProxyResponse, UpstreamRequest};
use crate::proxy::headers::{outgoing_request_headers, outgoing_response_headers};
use crate::proxy::origin::{resolve_origin, BuildMode, EnvSource, ProcessEnv};
use crate::proxy::relay::log_upstream_failure;
use crate::proxy::upstream::UpstreamClient;

/// Backend path probed for liveness
pub const BACKEND_HEALTH_PATH: &str = "/health";

/// Cache directive forced onto every probe reply
pub const NO_STORE: &str = "no-store, no-cache, must-revalidate";

pub struct HealthProxy<C> {
    client: Arc<C>,
    env: Arc<dyn EnvSource>,
    mode: BuildMode,
}

impl<C> Clone for HealthProxy<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            env: Arc::clone(&self.env),
            mode: self.mode,
        }
    }
}

impl<C: UpstreamClient> HealthProxy<C> {
    pub fn new(client: Arc<C>, mode: BuildMode) -> Self {
        Self::with_env(client, Arc::new(ProcessEnv), mode)
    }

    pub fn with_env(client: Arc<C>, env: Arc<dyn EnvSource>, mode: BuildMode) -> Self {
        Self { client, env, mode }
    }

    /// Probe the backend health endpoint.
    ///
    /// `query` is passed through untouched so cache-busting parameters reach
    /// the backend.
    pub async fn check(&self, query: Option<&str>, incoming: &HeaderMap) -> ProxyResponse {
        let origin = resolve_origin(self.env.as_ref(), self.mode);
        let request = UpstreamRequest {
            method: HttpMethod::Get,
            url: origin.url_for(BACKEND_HEALTH_PATH, query),
            headers: outgoing_request_headers(incoming),
            body: OutgoingBody::Empty,
        };

        let mut response = match self.client.send(request).await {
            Ok(upstream) => ProxyResponse::new(
                upstream.status,
                outgoing_response_headers(&upstream.headers),
                upstream.body,
            ),
            Err(err) => {
                log_upstream_failure(HttpMethod::Get, BACKEND_HEALTH_PATH, &origin.origin, &err);
                ProxyResponse::json(
                    502,
                    &json!({ "status": "error", "detail": "Backend unavailable" }),
                )
            }
        };

        force_no_store(&mut response.headers);
        response
    }
}

fn force_no_store(headers: &mut HeaderMap) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::origin::BACKEND_URL_VAR;
    use crate::proxy::upstream::testing::{ok_response, RecordingUpstream};
    use crate::proxy::upstream::UpstreamError;
    use std::collections::HashMap;

    fn health_for(upstream: &RecordingUpstream) -> HealthProxy<RecordingUpstream> {
        let mut env = HashMap::new();
        env.insert(BACKEND_URL_VAR.to_string(), "http://backend.test".to_string());
        HealthProxy::with_env(Arc::new(upstream.clone()), Arc::new(env), BuildMode::Production)
    }

    #[tokio::test]
    async fn healthy_reply_is_relayed_with_no_store() {
        let mut reply = ok_response(200, r#"{"status":"healthy"}"#);
        reply
            .headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
        let upstream = RecordingUpstream::replying(reply);
        let health = health_for(&upstream);

        let response = health.check(Some("t=1700000000000"), &HeaderMap::new()).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get(CACHE_CONTROL).unwrap(), NO_STORE);
        assert_eq!(&response.body[..], br#"{"status":"healthy"}"#);

        let sent = upstream.last_request();
        assert_eq!(sent.method, HttpMethod::Get);
        assert_eq!(sent.url, "http://backend.test/health?t=1700000000000");
        assert_eq!(sent.body, OutgoingBody::Empty);
    }

    #[tokio::test]
    async fn unreachable_backend_reports_status_error() {
        let upstream = RecordingUpstream::failing(UpstreamError::Connect("refused".into()));
        let health = health_for(&upstream);

        let response = health.check(None, &HeaderMap::new()).await;

        assert_eq!(response.status, 502);
        assert_eq!(response.headers.get(CACHE_CONTROL).unwrap(), NO_STORE);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            body,
            json!({"status": "error", "detail": "Backend unavailable"})
        );
    }
}
