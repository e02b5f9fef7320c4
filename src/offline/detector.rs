//! Online/offline state machine driven by health probes

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::CachedRecipeRecord;
use crate::storage::OfflineStore;

/// Result of one liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx with a parseable JSON body
    Healthy,
    /// 2xx but the body could not be parsed
    Inconclusive(String),
    /// Transport failure or non-2xx status
    Unreachable(String),
}

/// Something that can ask whether the backend is alive
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Probe that calls the edge health route over HTTP
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create probe client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn cache_busted_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}t={}", self.url, sep, Utc::now().timestamp_millis())
    }
}

impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> ProbeOutcome {
        let response = match self.client.get(self.cache_busted_url()).send().await {
            Ok(response) => response,
            Err(e) => return ProbeOutcome::Unreachable(e.to_string()),
        };
        let status = response.status();
        if !status.is_success() {
            return ProbeOutcome::Unreachable(format!("health probe returned {}", status));
        }
        match response.json::<serde_json::Value>().await {
            Ok(_) => ProbeOutcome::Healthy,
            Err(e) => ProbeOutcome::Inconclusive(e.to_string()),
        }
    }
}

/// Current reachability belief
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineState {
    pub online: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for OnlineState {
    fn default() -> Self {
        Self {
            online: true,
            last_checked: None,
        }
    }
}

/// Tracks whether the backend is reachable.
///
/// Pessimistic about connectivity: any failed probe flips to offline at once,
/// while only a healthy probe flips back to online.
pub struct OfflineDetector<P> {
    probe: P,
    store: Option<OfflineStore>,
    state: watch::Sender<OnlineState>,
}

impl<P: HealthProbe> OfflineDetector<P> {
    pub fn new(probe: P, store: Option<OfflineStore>) -> Self {
        let (state, _rx) = watch::channel(OnlineState::default());
        Self {
            probe,
            store,
            state,
        }
    }

    pub fn current(&self) -> OnlineState {
        self.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Receiver notified on every probe
    pub fn subscribe(&self) -> watch::Receiver<OnlineState> {
        self.state.subscribe()
    }

    /// Run one probe and apply the transition
    pub async fn check_now(&self) -> OnlineState {
        let outcome = self.probe.probe().await;
        let now = Utc::now();
        let mut next = OnlineState::default();
        self.state.send_modify(|state| {
            let was_online = state.online;
            state.online = match &outcome {
                ProbeOutcome::Healthy => true,
                ProbeOutcome::Unreachable(_) => false,
                ProbeOutcome::Inconclusive(_) => was_online,
            };
            state.last_checked = Some(now);
            if was_online != state.online {
                if state.online {
                    tracing::info!("Backend reachable again, switching to online mode");
                } else {
                    tracing::warn!(reason = ?outcome, "Backend unreachable, switching to offline mode");
                }
            }
            next = state.clone();
        });
        if let ProbeOutcome::Inconclusive(reason) = &outcome {
            tracing::debug!(reason = %reason, "Health probe inconclusive, keeping current state");
        }
        next
    }

    /// Snapshots available for the degraded view; empty while online
    pub async fn offline_recipes(&self) -> anyhow::Result<Vec<CachedRecipeRecord>> {
        if self.is_online() {
            return Ok(Vec::new());
        }
        match &self.store {
            Some(store) => store.list_all().await,
            None => Ok(Vec::new()),
        }
    }

    /// Probe immediately, then every `interval`, until the handle is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_now().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct ScriptedProbe {
        outcomes: Arc<Mutex<VecDeque<ProbeOutcome>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl ScriptedProbe {
        fn with(outcomes: Vec<ProbeOutcome>) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                calls: Arc::default(),
            }
        }
    }

    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> ProbeOutcome {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProbeOutcome::Healthy)
        }
    }

    fn unreachable() -> ProbeOutcome {
        ProbeOutcome::Unreachable("502".into())
    }

    #[tokio::test]
    async fn failed_probe_flips_offline_and_healthy_flips_back() {
        let detector = OfflineDetector::new(
            ScriptedProbe::with(vec![unreachable(), ProbeOutcome::Healthy]),
            None,
        );
        assert!(detector.is_online());
        assert!(detector.current().last_checked.is_none());

        let state = detector.check_now().await;
        assert!(!state.online);
        assert!(state.last_checked.is_some());

        assert!(detector.check_now().await.online);
    }

    #[tokio::test]
    async fn inconclusive_probe_never_changes_state() {
        let detector = OfflineDetector::new(
            ScriptedProbe::with(vec![
                ProbeOutcome::Inconclusive("not json".into()),
                unreachable(),
                ProbeOutcome::Inconclusive("not json".into()),
            ]),
            None,
        );

        assert!(detector.check_now().await.online, "stays online");
        assert!(!detector.check_now().await.online);
        assert!(
            !detector.check_now().await.online,
            "only a healthy probe brings it back"
        );
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let detector = OfflineDetector::new(ScriptedProbe::with(vec![unreachable()]), None);
        let mut rx = detector.subscribe();

        detector.check_now().await;

        rx.changed().await.expect("sender alive");
        assert!(!rx.borrow().online);
    }

    #[tokio::test]
    async fn offline_view_lists_cached_recipes() {
        let dir = tempdir().expect("temp dir");
        let store = OfflineStore::new(dir.path().to_str().unwrap()).unwrap();
        store.put("42", json!({"name": "Negroni"})).await.unwrap();

        let detector = OfflineDetector::new(
            ScriptedProbe::with(vec![unreachable(), ProbeOutcome::Healthy]),
            Some(store),
        );
        assert!(detector.offline_recipes().await.unwrap().is_empty());

        detector.check_now().await;
        let offline = detector.offline_recipes().await.unwrap();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].id, "42");

        detector.check_now().await;
        assert!(detector.offline_recipes().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_probes_immediately_then_periodically() {
        let probe = ScriptedProbe::default();
        let calls = Arc::clone(&probe.calls);
        let detector = Arc::new(OfflineDetector::new(probe, None));

        let handle = Arc::clone(&detector).spawn(Duration::from_secs(20));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*calls.lock().unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(*calls.lock().unwrap(), 2);

        handle.abort();
    }
}
