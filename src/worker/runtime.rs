//! Background cache worker
//!
//! Owns the shell caches and the shared-image mailbox, answers fetches it is
//! allowed to intercept and serves page messages from its own task.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use futures::future::join_all;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, Method};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::{
    HttpMethod, OutgoingBody, PageMessage, ProxyResponse, UpstreamRequest, WorkerReply,
};
use crate::proxy::headers::outgoing_request_headers;
use crate::proxy::relay::relay_response;
use crate::proxy::upstream::UpstreamClient;
use crate::worker::cache::CacheStorage;
use crate::worker::mailbox::SharedImageMailbox;
use crate::worker::multipart::{boundary_from_content_type, extract_file_field, MultipartError};

pub const DEFAULT_CACHE_VERSION: &str = "cocktail-shell-v1";
pub const DEFAULT_SHELL_ORIGIN: &str = "http://127.0.0.1:3001";
pub const DEFAULT_SHELL_ROUTES: [&str; 5] = ["/", "/recipes", "/favourites", "/offline", "/share"];
pub const API_PREFIX: &str = "/api/";
pub const SHARE_PATH: &str = "/share";
pub const SHARE_RECEIVED_LOCATION: &str = "/share?received=true";
pub const SHARE_FIELD: &str = "image";

const MESSAGE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Network failed and nothing was cached for the URL
    #[error("offline and no cached copy of {0}")]
    Offline(String),
    #[error("malformed share payload: {0}")]
    MalformedShare(#[from] MultipartError),
    #[error("worker message loop has stopped")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerPhase {
    Installing,
    Installed,
    Active { version: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Cache version tag; also the name of the current cache
    pub version: String,
    /// Origin the shell pages are fetched from
    pub shell_origin: String,
    pub shell_routes: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_CACHE_VERSION.to_string(),
            shell_origin: DEFAULT_SHELL_ORIGIN.to_string(),
            shell_routes: DEFAULT_SHELL_ROUTES.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Outcome of pre-caching the shell routes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// A fetch event as seen by the worker
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Path plus query, e.g. `/recipes?tab=new`
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker answered the fetch itself
    Respond(ProxyResponse),
    /// Not intercepted; the caller should handle it normally
    Passthrough,
}

pub struct CacheWorker<C> {
    config: WorkerConfig,
    client: Arc<C>,
    caches: CacheStorage,
    mailbox: SharedImageMailbox,
    phase: RwLock<WorkerPhase>,
}

impl<C: UpstreamClient> CacheWorker<C> {
    pub fn new(client: Arc<C>, config: WorkerConfig) -> Self {
        Self {
            config,
            client,
            caches: CacheStorage::new(),
            mailbox: SharedImageMailbox::new(),
            phase: RwLock::new(WorkerPhase::Installing),
        }
    }

    /// Share caches with an earlier worker generation
    pub fn with_caches(mut self, caches: CacheStorage) -> Self {
        self.caches = caches;
        self
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    pub fn mailbox(&self) -> &SharedImageMailbox {
        &self.mailbox
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn shell_request(&self, url: &str, headers: &HeaderMap) -> UpstreamRequest {
        UpstreamRequest {
            method: HttpMethod::Get,
            url: format!("{}{}", self.config.shell_origin.trim_end_matches('/'), url),
            headers: outgoing_request_headers(headers),
            body: OutgoingBody::Empty,
        }
    }

    /// Pre-cache every shell route, attempting all of them.
    ///
    /// Individual failures are logged and reported but never fail the install.
    pub async fn install(&self) -> InstallReport {
        self.set_phase(WorkerPhase::Installing);
        let cache = self.caches.open(&self.config.version);
        let no_headers = HeaderMap::new();

        let fetches = self.config.shell_routes.iter().map(|route| {
            let request = self.shell_request(route, &no_headers);
            async move { (route, self.client.send(request).await) }
        });

        let mut report = InstallReport::default();
        for (route, result) in join_all(fetches).await {
            match result {
                Ok(upstream) if (200..300).contains(&upstream.status) => {
                    cache.put(route, relay_response(upstream));
                    report.cached.push(route.clone());
                }
                Ok(upstream) => {
                    tracing::warn!(route = %route, status = upstream.status, "Shell route not cached");
                    report.failed.push(route.clone());
                }
                Err(e) => {
                    tracing::warn!(route = %route, error = %e, "Shell route not cached");
                    report.failed.push(route.clone());
                }
            }
        }

        tracing::info!(
            version = %self.config.version,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Worker installed"
        );
        self.set_phase(WorkerPhase::Installed);
        report
    }

    /// Drop every cache from other versions and start intercepting
    pub fn activate(&self) -> Vec<String> {
        let deleted = self.caches.retain_only(&self.config.version);
        for name in &deleted {
            tracing::info!(cache = %name, "Deleted stale shell cache");
        }
        self.set_phase(WorkerPhase::Active {
            version: self.config.version.clone(),
        });
        deleted
    }

    /// Install then activate without waiting for older generations
    pub async fn start(&self) -> InstallReport {
        let report = self.install().await;
        self.activate();
        report
    }

    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchOutcome, WorkerError> {
        if !matches!(self.phase(), WorkerPhase::Active { .. }) {
            return Ok(FetchOutcome::Passthrough);
        }
        if request.method == Method::POST && request.path() == SHARE_PATH {
            return self.receive_share(&request).map(FetchOutcome::Respond);
        }
        if request.method != Method::GET || request.path().starts_with(API_PREFIX) {
            return Ok(FetchOutcome::Passthrough);
        }
        self.network_first(request).await.map(FetchOutcome::Respond)
    }

    /// Fetch a page straight from the shell origin without touching the caches
    pub async fn fetch_from_network(&self, request: &FetchRequest) -> Result<ProxyResponse, WorkerError> {
        let upstream = self.shell_request(&request.url, &request.headers);
        match self.client.send(upstream).await {
            Ok(upstream) => Ok(relay_response(upstream)),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "Shell origin unreachable");
                Err(WorkerError::Offline(request.url.clone()))
            }
        }
    }

    async fn network_first(&self, request: FetchRequest) -> Result<ProxyResponse, WorkerError> {
        let upstream = self.shell_request(&request.url, &request.headers);
        match self.client.send(upstream).await {
            Ok(upstream) => {
                let response = relay_response(upstream);
                if response.is_success() {
                    let cache = self.caches.open(&self.config.version);
                    let copy = response.clone();
                    let url = request.url;
                    tokio::spawn(async move {
                        cache.put(&url, copy);
                    });
                }
                Ok(response)
            }
            Err(e) => match self.caches.match_url(&request.url) {
                Some(cached) => {
                    tracing::debug!(url = %request.url, error = %e, "Network failed, serving cached shell");
                    Ok(cached)
                }
                None => {
                    tracing::warn!(url = %request.url, error = %e, "Network failed and nothing cached");
                    Err(WorkerError::Offline(request.url))
                }
            },
        }
    }

    fn receive_share(&self, request: &FetchRequest) -> Result<ProxyResponse, WorkerError> {
        let boundary = request
            .content_type()
            .and_then(boundary_from_content_type)
            .ok_or(MultipartError::MissingBoundary)?;
        let image = extract_file_field(&request.body, &boundary, SHARE_FIELD)?;

        match &image {
            Some(image) => tracing::info!(bytes = image.data.len(), "Received shared image"),
            None => tracing::info!("Share arrived without an image field"),
        }
        self.mailbox.deliver(image);

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static(SHARE_RECEIVED_LOCATION));
        Ok(ProxyResponse::new(303, headers, Bytes::new()))
    }
}

struct Envelope {
    message: PageMessage,
    reply: oneshot::Sender<WorkerReply>,
}

/// Page-side handle to the worker's message loop
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl WorkerHandle {
    pub async fn post_message(&self, message: PageMessage) -> Result<WorkerReply, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { message, reply })
            .await
            .map_err(|_| WorkerError::Closed)?;
        rx.await.map_err(|_| WorkerError::Closed)
    }
}

/// Serve page messages one at a time until every handle is dropped.
///
/// Each message is handled to completion before the next is read, so a take
/// from the mailbox can never interleave with another.
pub fn spawn_message_loop(mailbox: SharedImageMailbox) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(MESSAGE_QUEUE_DEPTH);
    let task = tokio::spawn(async move {
        while let Some(Envelope { message, reply }) = rx.recv().await {
            let answer = match message {
                PageMessage::GetSharedImage => WorkerReply::from(mailbox.take()),
            };
            // The page may have stopped waiting.
            let _ = reply.send(answer);
        }
        tracing::debug!("Worker message loop stopped");
    });
    (WorkerHandle { tx }, task)
}
