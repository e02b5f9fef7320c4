//! Backend origin resolution
//!
//! The origin is looked up again for every relayed call so a changed
//! environment takes effect on the next request without a restart.

use std::collections::HashMap;

/// Environment variable carrying the backend origin override
pub const BACKEND_URL_VAR: &str = "BACKEND_URL";

/// Fallback origin for production builds
pub const DEFAULT_PRODUCTION_ORIGIN: &str = "http://backend:8000";

/// Fallback origin for local development
pub const DEFAULT_DEVELOPMENT_ORIGIN: &str = "http://localhost:8000";

/// Build mode selecting the fallback origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Production,
    Development,
}

impl BuildMode {
    /// Mode of the running binary
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            BuildMode::Development
        } else {
            BuildMode::Production
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "release" => Some(BuildMode::Production),
            "development" | "dev" | "debug" => Some(BuildMode::Development),
            _ => None,
        }
    }

    pub fn default_origin(&self) -> &'static str {
        match self {
            BuildMode::Production => DEFAULT_PRODUCTION_ORIGIN,
            BuildMode::Development => DEFAULT_DEVELOPMENT_ORIGIN,
        }
    }
}

/// Read access to environment variables
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Resolved upstream base URL, valid for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    pub origin: String,
}

impl OriginConfig {
    /// Join a path (and optional raw query) onto the origin
    pub fn url_for(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.origin, path, q),
            _ => format!("{}{}", self.origin, path),
        }
    }
}

/// Resolve the backend origin: explicit override first, mode default otherwise.
///
/// A blank override counts as absent. Trailing slashes are trimmed so paths
/// can be appended directly.
pub fn resolve_origin(env: &dyn EnvSource, mode: BuildMode) -> OriginConfig {
    let origin = env
        .var(BACKEND_URL_VAR)
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| mode.default_origin().to_string());
    OriginConfig { origin }
}
