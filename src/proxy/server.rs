//! Edge HTTP server
//!
//! One hyper HTTP/1.1 connection task per client. Requests are routed to the
//! health relay, the API relay, or the cache worker.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::ALLOW;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::models::{HttpMethod, PageMessage, ProxyRequest, ProxyResponse};
use crate::proxy::health::HealthProxy;
use crate::proxy::relay::EdgeProxy;
use crate::proxy::upstream::UpstreamClient;
use crate::worker::{CacheWorker, FetchOutcome, FetchRequest, WorkerError, WorkerHandle};

/// Hard cap on inbound bodies (32MB)
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

pub const API_PREFIX: &str = "/api";
pub const HEALTH_PATH: &str = "/api/health";
pub const WORKER_MESSAGE_PATH: &str = "/_worker/message";

const API_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD";
const ACCEPT_POLL: Duration = Duration::from_millis(500);

/// Routes one request to the component that owns it
pub struct EdgeRouter<C> {
    edge: EdgeProxy<C>,
    health: HealthProxy<C>,
    worker: Arc<CacheWorker<C>>,
    messages: WorkerHandle,
}

impl<C> Clone for EdgeRouter<C> {
    fn clone(&self) -> Self {
        Self {
            edge: self.edge.clone(),
            health: self.health.clone(),
            worker: Arc::clone(&self.worker),
            messages: self.messages.clone(),
        }
    }
}

impl<C: UpstreamClient> EdgeRouter<C> {
    pub fn new(
        edge: EdgeProxy<C>,
        health: HealthProxy<C>,
        worker: Arc<CacheWorker<C>>,
        messages: WorkerHandle,
    ) -> Self {
        Self {
            edge,
            health,
            worker,
            messages,
        }
    }

    /// Read the body under the size cap, then dispatch
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        let response = match read_body(body).await {
            Ok(body) => self.dispatch(parts.method, parts.uri, parts.headers, body).await,
            Err(rejection) => rejection,
        };
        into_hyper(response)
    }

    pub async fn dispatch(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> ProxyResponse {
        let path = uri.path();
        let query = uri.query();

        if path == HEALTH_PATH && method == Method::GET {
            return self.health.check(query, &headers).await;
        }

        if path == API_PREFIX || path.starts_with("/api/") {
            let Ok(method) = HttpMethod::try_from(&method) else {
                return method_not_allowed(API_METHODS);
            };
            // Forwarded verbatim, trailing and doubled slashes included
            let segments = match path[API_PREFIX.len()..].strip_prefix('/') {
                Some(rest) => rest.split('/').map(str::to_string).collect(),
                None => Vec::new(),
            };
            let mut request = ProxyRequest::new(method, segments)
                .with_headers(headers)
                .with_body(body);
            if let Some(query) = query {
                request = request.with_query(query);
            }
            return self.edge.relay(request).await;
        }

        if path == WORKER_MESSAGE_PATH {
            if method != Method::POST {
                return method_not_allowed("POST");
            }
            return self.post_message(&body).await;
        }

        let url = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.to_string());
        let fetch = FetchRequest {
            method: method.clone(),
            url,
            headers,
            body,
        };
        match self.worker.handle_fetch(fetch.clone()).await {
            Ok(FetchOutcome::Respond(response)) => response,
            // Not intercepted: the page goes to the network as usual
            Ok(FetchOutcome::Passthrough) if method == Method::GET => {
                match self.worker.fetch_from_network(&fetch).await {
                    Ok(response) => response,
                    Err(e) => worker_error_response(&e),
                }
            }
            Ok(FetchOutcome::Passthrough) => method_not_allowed("GET"),
            Err(e) => worker_error_response(&e),
        }
    }

    async fn post_message(&self, body: &Bytes) -> ProxyResponse {
        let message: PageMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                return ProxyResponse::json(
                    400,
                    &json!({ "detail": format!("Invalid worker message: {}", e) }),
                )
            }
        };
        match self.messages.post_message(message).await {
            Ok(reply) => match serde_json::to_value(&reply) {
                Ok(value) => ProxyResponse::json(200, &value),
                Err(e) => ProxyResponse::json(500, &json!({ "detail": e.to_string() })),
            },
            Err(e) => worker_error_response(&e),
        }
    }
}

async fn read_body<B>(body: B) -> Result<Bytes, ProxyResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_REQUEST_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            tracing::warn!(limit = MAX_REQUEST_BODY_BYTES, "Request body too large");
            Err(ProxyResponse::json(
                413,
                &json!({ "detail": "Request body too large" }),
            ))
        }
        Err(e) => Err(ProxyResponse::json(
            400,
            &json!({ "detail": format!("Failed to read request body: {}", e) }),
        )),
    }
}

fn method_not_allowed(allow: &'static str) -> ProxyResponse {
    let mut response = ProxyResponse::json(405, &json!({ "detail": "Method not allowed" }));
    response.headers.insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn worker_error_response(err: &WorkerError) -> ProxyResponse {
    let status = match err {
        WorkerError::Offline(_) | WorkerError::Closed => 503,
        WorkerError::MalformedShare(_) => 400,
    };
    ProxyResponse::json(status, &json!({ "detail": err.to_string() }))
}

fn into_hyper(response: ProxyResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    *out.headers_mut() = response.headers;
    out
}

/// Accept connections until `shutdown` flips to true
pub async fn serve<C: UpstreamClient>(
    listener: TcpListener,
    router: EdgeRouter<C>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Edge server listening on {}", addr);
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Use accept with timeout so we can check for shutdown periodically
        let accept_result = tokio::time::timeout(ACCEPT_POLL, listener.accept()).await;

        match accept_result {
            Ok(Ok((socket, peer_addr))) => {
                tracing::debug!("Connection from {}", peer_addr);
                let router = router.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let router = router.clone();
                        async move { Ok::<_, Infallible>(router.handle(request).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(socket), service)
                        .await
                    {
                        let err_str = e.to_string().to_lowercase();
                        if e.is_incomplete_message()
                            || err_str.contains("broken pipe")
                            || err_str.contains("connection reset")
                        {
                            tracing::debug!("Connection closed by client: {}", e);
                        } else {
                            tracing::error!("Error handling connection: {}", e);
                        }
                    }
                });
            }
            Ok(Err(e)) => tracing::error!("Accept error: {}", e),
            Err(_) => continue,
        }
    }

    tracing::info!("Edge server stopped");
    Ok(())
}
