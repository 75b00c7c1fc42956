use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zap_live_api_common::LiveStatus;
use zap_live_db::{HostPatch, SharedStore, WriteResult};

/// Broadcasts without a heartbeat for this long are ended
pub const HEARTBEAT_TIMEOUT_SECS: i64 = 60;

fn live_patch(is_live: bool) -> HostPatch {
    HostPatch {
        is_live: Some(is_live),
        ..Default::default()
    }
}

/// Scoped ownership of a hosts live status.
///
/// `isLive` is set when acquired and cleared by [BroadcastGuard::finish], or in the
/// background when the guard is dropped without finishing.
pub struct BroadcastGuard {
    store: SharedStore,
    host_id: String,
    finished: bool,
}

impl BroadcastGuard {
    pub async fn start(store: SharedStore, host_id: &str) -> Result<Self> {
        let host = store
            .get_host(host_id)
            .await?
            .ok_or_else(|| anyhow!("Not a host"))?;
        if host.is_banned {
            bail!("Banned hosts cannot go live");
        }
        store.update_host(host_id, &live_patch(true)).await?;
        info!("Host {} is live", host_id);
        Ok(Self {
            store,
            host_id: host_id.to_string(),
            finished: false,
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub async fn finish(mut self) -> WriteResult {
        self.finished = true;
        let r = self
            .store
            .update_host(&self.host_id, &live_patch(false))
            .await;
        info!("Host {} is offline", self.host_id);
        r
    }

    /// Forget a guard whose broadcast is owned by another guard
    fn finished_without_write(mut self) {
        self.finished = true;
    }
}

impl Drop for BroadcastGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let store = self.store.clone();
        let host_id = self.host_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = store.update_host(&host_id, &live_patch(false)).await {
                        error!("Failed to end broadcast of {}: {}", host_id, e);
                    }
                });
            }
            Err(_) => warn!("Broadcast of {} dropped outside runtime", self.host_id),
        }
    }
}

struct ActiveBroadcast {
    guard: BroadcastGuard,
    started_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
}

impl ActiveBroadcast {
    fn status(&self) -> LiveStatus {
        LiveStatus {
            host_id: self.guard.host_id().to_string(),
            started_at: self.started_at,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Tracks live broadcasts, any host not in this map is offline
#[derive(Clone)]
pub struct BroadcastManager {
    store: SharedStore,
    active: Arc<RwLock<HashMap<String, ActiveBroadcast>>>,
}

impl BroadcastManager {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start broadcasting, or refresh the heartbeat of an existing broadcast
    pub async fn go_live(&self, host_id: &str, now: DateTime<Utc>) -> Result<LiveStatus> {
        if let Some(b) = self.active.write().await.get_mut(host_id) {
            b.last_heartbeat = now;
            return Ok(b.status());
        }
        let guard = BroadcastGuard::start(self.store.clone(), host_id).await?;
        let b = ActiveBroadcast {
            guard,
            started_at: now,
            last_heartbeat: now,
        };
        let status = b.status();
        let mut active = self.active.write().await;
        // another request may have started it in the meantime
        if let Some(existing) = active.get(host_id) {
            let status = existing.status();
            drop(active);
            b.guard.finished_without_write();
            return Ok(status);
        }
        active.insert(host_id.to_string(), b);
        Ok(status)
    }

    pub async fn heartbeat(&self, host_id: &str, now: DateTime<Utc>) -> Result<LiveStatus> {
        let mut active = self.active.write().await;
        let Some(b) = active.get_mut(host_id) else {
            bail!("Not live");
        };
        b.last_heartbeat = now;
        Ok(b.status())
    }

    pub async fn end(&self, host_id: &str) -> Result<()> {
        let b = self.active.write().await.remove(host_id);
        match b {
            Some(b) => Ok(b.guard.finish().await?),
            None => bail!("Not live"),
        }
    }

    pub async fn is_live(&self, host_id: &str) -> bool {
        self.active.read().await.contains_key(host_id)
    }

    /// End broadcasts which missed their heartbeat, returns the ended host ids
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<ActiveBroadcast> = {
            let mut active = self.active.write().await;
            let ids: Vec<String> = active
                .iter()
                .filter(|(_, b)| (now - b.last_heartbeat).num_seconds() > HEARTBEAT_TIMEOUT_SECS)
                .map(|(k, _)| k.clone())
                .collect();
            ids.iter().filter_map(|id| active.remove(id)).collect()
        };
        let mut ended = Vec::new();
        for b in stale {
            let id = b.guard.host_id().to_string();
            warn!("Broadcast of {} timed out", id);
            if let Err(e) = b.guard.finish().await {
                error!("Failed to end broadcast of {}: {}", id, e);
            }
            ended.push(id);
        }
        ended
    }

    /// End every broadcast, used on shutdown
    pub async fn end_all(&self) {
        let all: Vec<ActiveBroadcast> = self.active.write().await.drain().map(|(_, b)| b).collect();
        for b in all {
            let id = b.guard.host_id().to_string();
            if let Err(e) = b.guard.finish().await {
                error!("Failed to end broadcast of {}: {}", id, e);
            }
        }
    }

    pub fn start_monitor(&self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        let mgr = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        mgr.end_all().await;
                        info!("Broadcast monitor shutdown.");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {
                        mgr.expire_stale(Utc::now()).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zap_live_db::{Host, LiveStore, MemoryStore};

    async fn setup() -> Result<(MemoryStore, SharedStore)> {
        let store = MemoryStore::new();
        store.upsert_host(&Host::new("h1", "Host", Utc::now())).await?;
        let shared: SharedStore = Arc::new(store.clone());
        Ok((store, shared))
    }

    async fn is_live(store: &MemoryStore) -> Result<bool> {
        Ok(store.get_host("h1").await?.map(|h| h.is_live).unwrap_or(false))
    }

    #[tokio::test]
    async fn test_guard_finish() -> Result<()> {
        let (store, shared) = setup().await?;
        let guard = BroadcastGuard::start(shared, "h1").await?;
        assert!(is_live(&store).await?);
        guard.finish().await?;
        assert!(!is_live(&store).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_guard_drop_ends_broadcast() -> Result<()> {
        let (store, shared) = setup().await?;
        let guard = BroadcastGuard::start(shared, "h1").await?;
        assert!(is_live(&store).await?);
        drop(guard);

        for _ in 0..100 {
            if !is_live(&store).await? {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
        bail!("Host still live after guard was dropped");
    }

    #[tokio::test]
    async fn test_banned_host_cannot_go_live() -> Result<()> {
        let (store, shared) = setup().await?;
        store
            .update_host(
                "h1",
                &HostPatch {
                    is_banned: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        assert!(BroadcastGuard::start(shared, "h1").await.is_err());
        assert!(!is_live(&store).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_manager_expires_stale() -> Result<()> {
        let (store, shared) = setup().await?;
        let mgr = BroadcastManager::new(shared);
        let start = Utc::now();
        mgr.go_live("h1", start).await?;
        assert!(mgr.is_live("h1").await);

        let t = start + chrono::Duration::seconds(30);
        mgr.heartbeat("h1", t).await?;
        assert!(mgr.expire_stale(t + chrono::Duration::seconds(59)).await.is_empty());
        assert_eq!(
            mgr.expire_stale(t + chrono::Duration::seconds(61)).await,
            vec!["h1".to_string()]
        );
        assert!(!mgr.is_live("h1").await);
        assert!(!is_live(&store).await?);
        assert!(mgr.heartbeat("h1", t).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_manager_end() -> Result<()> {
        let (store, shared) = setup().await?;
        let mgr = BroadcastManager::new(shared);
        mgr.go_live("h1", Utc::now()).await?;
        mgr.go_live("h1", Utc::now()).await?;
        mgr.end("h1").await?;
        assert!(!is_live(&store).await?);
        assert!(mgr.end("h1").await.is_err());
        Ok(())
    }
}
