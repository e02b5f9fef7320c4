//! Upstream transport
//!
//! `UpstreamClient` is the seam between the relay logic and the network. The
//! production implementation is reqwest with redirects disabled and a bounded
//! timeout; tests substitute an in-process fake.

use std::future::Future;
use std::time::Duration;

use http::header::CONTENT_LENGTH;
use thiserror::Error;

use crate::models::{OutgoingBody, UpstreamRequest, UpstreamResponse};

/// Network-level failure reaching the backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("could not connect to upstream: {0}")]
    Connect(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("failed to read upstream body: {0}")]
    Body(String),
}

/// Transport used to reach the backend (or the shell origin)
pub trait UpstreamClient: Send + Sync + 'static {
    fn send(
        &self,
        request: UpstreamRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, UpstreamError>> + Send;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// Build a client that never follows redirects and gives up after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let UpstreamRequest {
            method,
            url,
            mut headers,
            body,
        } = request;

        // The transport frames the body itself.
        headers.remove(CONTENT_LENGTH);

        let mut builder = self
            .client
            .request(http::Method::from(method), url.as_str())
            .headers(headers);
        builder = match body {
            OutgoingBody::Empty => builder,
            OutgoingBody::Text(text) => builder.body(text),
            OutgoingBody::Binary(bytes) => builder.body(bytes),
        };

        let response = builder.send().await.map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| match classify_reqwest_error(&e) {
                UpstreamError::Timeout(msg) => UpstreamError::Timeout(msg),
                other => UpstreamError::Body(other.to_string()),
            })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Classify reqwest errors into upstream failure kinds
pub fn classify_reqwest_error(err: &reqwest::Error) -> UpstreamError {
    let message = err.to_string();
    if err.is_timeout() {
        UpstreamError::Timeout(message)
    } else if err.is_connect() {
        UpstreamError::Connect(message)
    } else if err.is_body() || err.is_decode() {
        UpstreamError::Body(message)
    } else {
        UpstreamError::Request(message)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process upstream fake shared by the relay, health and worker tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub struct RecordingUpstream {
        reply: Arc<Mutex<Result<UpstreamResponse, UpstreamError>>>,
        pub requests: Arc<Mutex<Vec<UpstreamRequest>>>,
    }

    impl RecordingUpstream {
        pub fn replying(response: UpstreamResponse) -> Self {
            Self {
                reply: Arc::new(Mutex::new(Ok(response))),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn failing(error: UpstreamError) -> Self {
            Self {
                reply: Arc::new(Mutex::new(Err(error))),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn set_reply(&self, reply: Result<UpstreamResponse, UpstreamError>) {
            *self.reply.lock().unwrap() = reply;
        }

        pub fn last_request(&self) -> UpstreamRequest {
            self.requests
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("at least one upstream request")
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl UpstreamClient for RecordingUpstream {
        async fn send(
            &self,
            request: UpstreamRequest,
        ) -> Result<UpstreamResponse, UpstreamError> {
            self.requests.lock().unwrap().push(request);
            self.reply.lock().unwrap().clone()
        }
    }

    pub fn ok_response(status: u16, body: &'static str) -> UpstreamResponse {
        UpstreamResponse {
            status,
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::from_static(body.as_bytes()),
        }
    }
}
