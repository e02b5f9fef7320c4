//! Named shell caches
//!
//! Each cache is tagged with a worker version; activation deletes every cache
//! whose name is not the current version. There is no per-entry expiry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::models::ProxyResponse;

/// One named cache of URL → response pairs
#[derive(Debug, Default)]
pub struct ShellCache {
    name: String,
    entries: DashMap<String, ProxyResponse>,
}

impl ShellCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, url: &str, response: ProxyResponse) {
        self.entries.insert(url.to_string(), response);
    }

    pub fn match_url(&self, url: &str) -> Option<ProxyResponse> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All named caches visible to the worker
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    caches: Arc<DashMap<String, Arc<ShellCache>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if needed
    pub fn open(&self, name: &str) -> Arc<ShellCache> {
        Arc::clone(
            self.caches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ShellCache::new(name)))
                .value(),
        )
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn delete(&self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// First match for `url` across every cache
    pub fn match_url(&self, url: &str) -> Option<ProxyResponse> {
        self.caches
            .iter()
            .find_map(|cache| cache.value().match_url(url))
    }

    /// Delete every cache not named `keep`; returns the deleted names
    pub fn retain_only(&self, keep: &str) -> Vec<String> {
        let stale: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|name| name != keep)
            .collect();
        for name in &stale {
            self.delete(name);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn page(body: &'static str) -> ProxyResponse {
        ProxyResponse::new(200, HeaderMap::new(), body)
    }

    #[test]
    fn open_is_create_or_get() {
        let storage = CacheStorage::new();
        storage.open("shell-v1").put("/", page("home"));

        let again = storage.open("shell-v1");
        assert_eq!(again.len(), 1);
        assert_eq!(again.name(), "shell-v1");
        assert_eq!(&again.match_url("/").unwrap().body[..], b"home");
    }

    #[test]
    fn retain_only_purges_other_versions() {
        let storage = CacheStorage::new();
        storage.open("shell-v1").put("/", page("old"));
        storage.open("shell-v2").put("/", page("older"));
        storage.open("shell-v3");

        let mut deleted = storage.retain_only("shell-v3");
        deleted.sort();

        assert_eq!(deleted, vec!["shell-v1", "shell-v2"]);
        assert_eq!(storage.keys(), vec!["shell-v3"]);
        assert!(storage.match_url("/").is_none());
    }

    #[test]
    fn match_url_searches_all_caches() {
        let storage = CacheStorage::new();
        storage.open("a");
        storage.open("b").put("/recipes", page("list"));

        assert_eq!(&storage.match_url("/recipes").unwrap().body[..], b"list");
        assert!(storage.match_url("/missing").is_none());
    }
}
