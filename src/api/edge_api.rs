//! Edge API
//!
//! Host-facing entry points: start and stop the edge, query its status and
//! reach the offline subsystem and the cache worker while it runs.

use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;

use crate::models::{CachedRecipeRecord, PageMessage};
use crate::offline::{FavouritesSync, HttpHealthProbe, OfflineDetector, OnlineState, ReconcileReport};
use crate::proxy::origin::{BuildMode, EnvSource, ProcessEnv};
use crate::proxy::server::{serve, EdgeRouter, HEALTH_PATH};
use crate::proxy::{EdgeProxy, HealthProxy, ReqwestUpstream};
use crate::storage::OfflineStore;
use crate::worker::runtime::{DEFAULT_CACHE_VERSION, DEFAULT_SHELL_ORIGIN, DEFAULT_SHELL_ROUTES};
use crate::worker::{spawn_message_loop, CacheWorker, WorkerConfig, WorkerHandle};

pub const EDGE_MODE_VAR: &str = "EDGE_MODE";
pub const EDGE_PORT_VAR: &str = "EDGE_PORT";
pub const EDGE_BIND_ADDRESS_VAR: &str = "EDGE_BIND_ADDRESS";
pub const EDGE_STORAGE_PATH_VAR: &str = "EDGE_STORAGE_PATH";
pub const EDGE_SHELL_ORIGIN_VAR: &str = "EDGE_SHELL_ORIGIN";
pub const EDGE_UPSTREAM_TIMEOUT_VAR: &str = "EDGE_UPSTREAM_TIMEOUT_SECS";
pub const EDGE_PROBE_INTERVAL_VAR: &str = "EDGE_PROBE_INTERVAL_SECS";
pub const EDGE_CACHE_VERSION_VAR: &str = "EDGE_CACHE_VERSION";

const PORT_SEARCH_TRIES: u16 = 20;
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// Global edge state
static EDGE_RUNNING: AtomicBool = AtomicBool::new(false);
static RUNTIME: Mutex<Option<EdgeRuntime>> = Mutex::new(None);

/// Current running edge address (port, bind_address)
static CURRENT_EDGE_ADDRESS: Lazy<RwLock<(u16, String)>> =
    Lazy::new(|| RwLock::new((3000, "127.0.0.1".to_string())));

/// Services reachable through the facade while the edge runs
#[derive(Clone)]
struct EdgeServices {
    detector: Arc<OfflineDetector<HttpHealthProbe>>,
    favourites: FavouritesSync,
    messages: WorkerHandle,
    cache_version: String,
}

struct EdgeRuntime {
    services: EdgeServices,
    shutdown: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    probe_task: JoinHandle<()>,
    message_task: JoinHandle<()>,
}

impl EdgeRuntime {
    /// Signal the accept loop, stop the background tasks and wait for the
    /// server task to finish
    async fn shut_down(self) {
        let _ = self.shutdown.send(true);
        self.probe_task.abort();
        self.message_task.abort();
        if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, self.server_task)
            .await
            .is_err()
        {
            tracing::warn!("Edge server did not stop within {:?}", SERVER_DRAIN_TIMEOUT);
        }
    }
}

fn take_runtime() -> Option<EdgeRuntime> {
    RUNTIME.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Initialize logging (call once at startup)
///
/// Debug builds log to stderr. Release builds write a daily file under
/// `<storage_path>/logs`.
pub fn init_core(storage_path: Option<String>) -> Result<bool, String> {
    let level = log_level_from(std::env::var("RUST_LOG").ok().as_deref());
    install_subscriber(level, storage_path.as_deref())?;
    tracing::info!(version = crate::VERSION, %level, "Cocktail edge initialized");
    Ok(true)
}

#[cfg(debug_assertions)]
fn install_subscriber(level: LevelFilter, _storage_path: Option<&str>) -> Result<(), String> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

#[cfg(not(debug_assertions))]
fn install_subscriber(level: LevelFilter, storage_path: Option<&str>) -> Result<(), String> {
    let log_dir = storage_path
        .map(|p| PathBuf::from(p).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| format!("Cannot create log directory {}: {}", log_dir.display(), e))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "cocktail_edge"));
    // Flushes for the life of the process
    std::mem::forget(guard);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    Ok(())
}

/// Level named by `RUST_LOG`; unset or unrecognised means INFO
fn log_level_from(raw: Option<&str>) -> LevelFilter {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("off") => LevelFilter::OFF,
        Some("error") => LevelFilter::ERROR,
        Some("warn" | "warning") => LevelFilter::WARN,
        Some("debug") => LevelFilter::DEBUG,
        Some("trace") => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Edge configuration
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (e.g., "127.0.0.1")
    pub bind_address: String,
    /// Directory for the offline database
    pub storage_path: String,
    /// Selects the fallback backend origin when `BACKEND_URL` is unset
    pub mode: BuildMode,
    /// Origin the shell pages are fetched from
    pub shell_origin: String,
    pub upstream_timeout_secs: u64,
    pub probe_interval_secs: u64,
    pub cache_version: String,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "127.0.0.1".to_string(),
            storage_path: default_storage_path(),
            mode: BuildMode::current(),
            shell_origin: DEFAULT_SHELL_ORIGIN.to_string(),
            upstream_timeout_secs: 30,
            probe_interval_secs: 20,
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
        }
    }
}

fn default_storage_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("cocktail-edge"))
        .unwrap_or_else(|| PathBuf::from("./cocktail_edge_data"))
        .to_string_lossy()
        .to_string()
}

fn parsed_var<T: std::str::FromStr>(env: &dyn EnvSource, key: &str, fallback: T) -> T {
    match env.var(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = key, value = %raw, "Ignoring unparseable setting");
                fallback
            }
        },
        None => fallback,
    }
}

fn text_var(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EdgeConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &dyn EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var(env, EDGE_PORT_VAR, defaults.port),
            bind_address: text_var(env, EDGE_BIND_ADDRESS_VAR).unwrap_or(defaults.bind_address),
            storage_path: text_var(env, EDGE_STORAGE_PATH_VAR).unwrap_or(defaults.storage_path),
            mode: text_var(env, EDGE_MODE_VAR)
                .and_then(|m| BuildMode::parse(&m))
                .unwrap_or(defaults.mode),
            shell_origin: text_var(env, EDGE_SHELL_ORIGIN_VAR).unwrap_or(defaults.shell_origin),
            upstream_timeout_secs: parsed_var(
                env,
                EDGE_UPSTREAM_TIMEOUT_VAR,
                defaults.upstream_timeout_secs,
            )
            .max(1),
            probe_interval_secs: parsed_var(env, EDGE_PROBE_INTERVAL_VAR, defaults.probe_interval_secs)
                .max(1),
            cache_version: text_var(env, EDGE_CACHE_VERSION_VAR).unwrap_or(defaults.cache_version),
        }
    }
}

pub fn create_default_config() -> EdgeConfig {
    EdgeConfig::default()
}

/// Edge status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeStatus {
    pub is_running: bool,
    pub port: u16,
    pub bind_address: String,
    /// Current reachability belief, `None` while stopped
    pub online: Option<bool>,
    /// Active shell cache version, `None` while stopped
    pub cache_version: Option<String>,
}

pub fn get_edge_status() -> EdgeStatus {
    let (port, bind_address) = CURRENT_EDGE_ADDRESS
        .read()
        .map(|address| address.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
    let services = services().ok();
    EdgeStatus {
        is_running: EDGE_RUNNING.load(Ordering::SeqCst),
        port,
        bind_address,
        online: services.as_ref().map(|s| s.detector.is_online()),
        cache_version: services.map(|s| s.cache_version),
    }
}

fn services() -> Result<EdgeServices, String> {
    RUNTIME
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|runtime| runtime.services.clone())
        .ok_or_else(|| "Edge is not running".to_string())
}

/// Start the edge server
/// Returns Ok(true) if started successfully
pub async fn start_edge(config: EdgeConfig) -> Result<bool, String> {
    if EDGE_RUNNING.load(Ordering::SeqCst) {
        tracing::info!("Edge already running");
        return Ok(true);
    }
    // Left behind when the server task exited on its own
    if let Some(stale) = take_runtime() {
        tracing::warn!("Clearing state from an edge that stopped unexpectedly");
        stale.shut_down().await;
    }

    let listener = bind_available_port(&config.bind_address, config.port, PORT_SEARCH_TRIES).await?;
    let port = listener.local_addr().map_err(|e| e.to_string())?.port();
    if port != config.port {
        tracing::warn!("Port {} in use, falling back to {}", config.port, port);
    }

    let store = OfflineStore::new(&config.storage_path).map_err(|e| e.to_string())?;
    let cached_ids = store.ids().await.map_err(|e| e.to_string())?;
    let favourites = FavouritesSync::new(store.clone(), cached_ids);

    let timeout = Duration::from_secs(config.upstream_timeout_secs);
    let client = Arc::new(ReqwestUpstream::new(timeout).map_err(|e| e.to_string())?);

    let worker = Arc::new(CacheWorker::new(
        Arc::clone(&client),
        WorkerConfig {
            version: config.cache_version.clone(),
            shell_origin: config.shell_origin.clone(),
            shell_routes: DEFAULT_SHELL_ROUTES.iter().map(|r| r.to_string()).collect(),
        },
    ));
    let (messages, message_task) = spawn_message_loop(worker.mailbox().clone());
    {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            worker.start().await;
        });
    }

    // Probe through our own health route so the detector sees what pages see
    let probe_host = match config.bind_address.as_str() {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    let probe = HttpHealthProbe::new(
        format!("http://{}:{}{}", probe_host, port, HEALTH_PATH),
        timeout,
    )
    .map_err(|e| e.to_string())?;
    let detector = Arc::new(OfflineDetector::new(probe, Some(store)));

    let router = EdgeRouter::new(
        EdgeProxy::new(Arc::clone(&client), config.mode),
        HealthProxy::new(client, config.mode),
        worker,
        messages.clone(),
    );
    let (shutdown, shutdown_rx) = watch::channel(false);

    EDGE_RUNNING.store(true, Ordering::SeqCst);
    {
        let mut current = CURRENT_EDGE_ADDRESS
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = (port, config.bind_address.clone());
    }
    tracing::info!(
        bind_address = %config.bind_address,
        port,
        mode = ?config.mode,
        cache_version = %config.cache_version,
        "Starting edge"
    );

    let server_task = tokio::spawn(async move {
        if let Err(e) = serve(listener, router, shutdown_rx).await {
            tracing::error!("Edge server error: {}", e);
        }
        EDGE_RUNNING.store(false, Ordering::SeqCst);
    });

    let probe_task = Arc::clone(&detector).spawn(Duration::from_secs(config.probe_interval_secs));

    let runtime = EdgeRuntime {
        services: EdgeServices {
            detector,
            favourites,
            messages,
            cache_version: config.cache_version,
        },
        shutdown,
        server_task,
        probe_task,
        message_task,
    };
    *RUNTIME.lock().unwrap_or_else(PoisonError::into_inner) = Some(runtime);

    Ok(true)
}

/// Bind the first free port at or above `start_port`
async fn bind_available_port(
    bind_address: &str,
    start_port: u16,
    tries: u16,
) -> Result<TcpListener, String> {
    let last_port = start_port.saturating_add(tries.saturating_sub(1));
    for port in start_port..=last_port {
        match TcpListener::bind((bind_address, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port busy");
            }
            Err(e) => return Err(format!("Cannot bind {}:{}: {}", bind_address, port, e)),
        }
    }
    Err(format!(
        "Ports {}-{} on {} are all in use",
        start_port, last_port, bind_address
    ))
}

/// Stop the edge server
pub async fn stop_edge() -> Result<bool, String> {
    tracing::info!("Stopping edge");
    if let Some(runtime) = take_runtime() {
        runtime.shut_down().await;
    }
    EDGE_RUNNING.store(false, Ordering::SeqCst);
    Ok(true)
}

/// Flip a favourite; `snapshot_json` is the recipe to cache when favouriting
pub fn toggle_favourite(id: String, snapshot_json: Option<String>) -> Result<bool, String> {
    let snapshot = snapshot_json
        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
        .transpose()
        .map_err(|e| format!("Invalid recipe snapshot: {}", e))?;
    Ok(services()?.favourites.toggle_favourite(&id, snapshot))
}

pub fn list_favourites() -> Result<Vec<String>, String> {
    Ok(services()?.favourites.favourites())
}

pub async fn reconcile_favourites() -> Result<ReconcileReport, String> {
    services()?
        .favourites
        .reconcile()
        .await
        .map_err(|e| e.to_string())
}

pub fn get_online_state() -> Result<OnlineState, String> {
    Ok(services()?.detector.current())
}

/// Probe now instead of waiting for the next tick
pub async fn check_online_now() -> Result<OnlineState, String> {
    Ok(services()?.detector.check_now().await)
}

/// Cached recipes for the degraded view (empty while online)
pub async fn list_offline_recipes() -> Result<Vec<CachedRecipeRecord>, String> {
    services()?
        .detector
        .offline_recipes()
        .await
        .map_err(|e| e.to_string())
}

/// Post a JSON page message to the worker and return its JSON reply
pub async fn post_worker_message(message_json: String) -> Result<String, String> {
    let message: PageMessage =
        serde_json::from_str(&message_json).map_err(|e| format!("Invalid worker message: {}", e))?;
    let reply = services()?
        .messages
        .post_message(message)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_string(&reply).map_err(|e| e.to_string())
}
