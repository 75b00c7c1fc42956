use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zap_live_db::{
    LatestPendingRequest, LiveStore, RequestKind, RequestStatus, SharedStore, StreamRequest,
    SubscriptionRegistry,
};

/// Requests older than this when first observed are never shown
pub const REQUEST_FRESHNESS_SECS: i64 = 30;

/// How long a request stays on screen without a response
pub const POPUP_DISPLAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PopupState {
    Idle,
    Shown {
        request: StreamRequest,
        shown_at: DateTime<Utc>,
    },
}

/// How many already shown request ids a notifier remembers
const SEEN_CAPACITY: usize = 64;

/// Decides which pending request, if any, is surfaced to a host.
///
/// Only the most recent pending request is considered. Dismissing a request by timeout
/// leaves it `pending`, it is just not shown again.
#[derive(Debug)]
pub struct RequestNotifier {
    state: PopupState,
    /// Requests which were already shown, oldest first
    seen: VecDeque<String>,
}

impl Default for RequestNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestNotifier {
    pub fn new() -> Self {
        Self {
            state: PopupState::Idle,
            seen: VecDeque::with_capacity(SEEN_CAPACITY),
        }
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn shown(&self) -> Option<&StreamRequest> {
        match &self.state {
            PopupState::Shown { request, .. } => Some(request),
            PopupState::Idle => None,
        }
    }

    fn was_seen(&self, id: &str) -> bool {
        self.seen.iter().any(|s| s == id)
    }

    fn mark_seen(&mut self, id: &str) {
        if self.seen.len() >= SEEN_CAPACITY {
            self.seen.pop_front();
        }
        self.seen.push_back(id.to_string());
    }

    /// Feed the current result of the latest pending request query.
    ///
    /// Returns true when a request becomes visible.
    pub fn observe(&mut self, latest: Option<StreamRequest>, now: DateTime<Utc>) -> bool {
        let Some(request) = latest.filter(|r| r.status == RequestStatus::Pending) else {
            // resolved elsewhere
            self.state = PopupState::Idle;
            return false;
        };
        if self.shown().map(|r| r.id == request.id).unwrap_or(false) {
            return false;
        }
        if self.was_seen(&request.id) {
            // an older request resurfacing after a newer one was answered
            self.state = PopupState::Idle;
            return false;
        }
        if (now - request.timestamp).num_seconds() > REQUEST_FRESHNESS_SECS {
            debug!("Ignoring stale request {}", request.id);
            return false;
        }
        self.mark_seen(&request.id);
        self.state = PopupState::Shown {
            request,
            shown_at: now,
        };
        true
    }

    /// Host answered the shown request, returns the id which must be updated
    pub fn respond(&mut self, status: RequestStatus) -> Result<Option<String>> {
        if status == RequestStatus::Pending {
            bail!("A request can only be approved or rejected");
        }
        let id = self.shown().map(|r| r.id.clone());
        self.state = PopupState::Idle;
        Ok(id)
    }

    /// Hide the popup if [id] is shown, the request stays pending
    pub fn dismiss(&mut self, id: &str) -> bool {
        if self.shown().map(|r| r.id == id).unwrap_or(false) {
            self.state = PopupState::Idle;
            return true;
        }
        false
    }
}

/// Viewer side creation of a request to a host
pub async fn create_request(
    store: &dyn LiveStore,
    host_id: &str,
    user_id: &str,
    user_name: Option<String>,
    kind: RequestKind,
    now: DateTime<Utc>,
) -> Result<StreamRequest> {
    if host_id == user_id {
        bail!("Cannot send a request to yourself");
    }
    let host = store
        .get_host(host_id)
        .await?
        .ok_or_else(|| anyhow!("Host not found"))?;
    if host.is_banned {
        bail!("Host is not available");
    }
    let req = StreamRequest {
        id: Uuid::new_v4().to_string(),
        host_id: host_id.to_string(),
        user_id: user_id.to_string(),
        user_name,
        kind,
        status: RequestStatus::Pending,
        timestamp: now,
    };
    store.create_stream_request(&req).await?;
    info!("New {:?} request {} for host {}", kind, req.id, host_id);
    Ok(req)
}

type RespondMsg = (String, RequestStatus, oneshot::Sender<Result<()>>);

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A [RequestNotifier] driven by a live subscription for a single host
pub struct RequestPopup {
    host_id: String,
    state: watch::Receiver<PopupState>,
    responses: mpsc::Sender<RespondMsg>,
    _task: AbortOnDrop,
}

impl RequestPopup {
    pub fn spawn(
        store: SharedStore,
        registry: &SubscriptionRegistry<LatestPendingRequest>,
        host_id: &str,
    ) -> Self {
        let mut sub = registry.subscribe(LatestPendingRequest {
            host_id: host_id.to_string(),
        });
        let (state_tx, state_rx) = watch::channel(PopupState::Idle);
        let (resp_tx, mut resp_rx) = mpsc::channel::<RespondMsg>(8);
        let host = host_id.to_string();

        let handle = tokio::spawn(async move {
            let mut notifier = RequestNotifier::new();
            let mut deadline: Option<Instant> = None;

            match sub.ready().await {
                Ok(snap) => {
                    if notifier.observe(snap.docs.into_iter().next(), Utc::now()) {
                        deadline = Some(Instant::now() + POPUP_DISPLAY);
                    }
                    state_tx.send_replace(notifier.state().clone());
                }
                Err(e) => {
                    warn!("Request popup for {} closed: {}", host, e);
                    return;
                }
            }

            loop {
                let until = deadline;
                let timer = async move {
                    match until {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    r = sub.changed() => {
                        let Ok(snap) = r else {
                            return;
                        };
                        if notifier.observe(snap.docs.into_iter().next(), Utc::now()) {
                            deadline = Some(Instant::now() + POPUP_DISPLAY);
                        } else if notifier.shown().is_none() {
                            deadline = None;
                        }
                    }
                    msg = resp_rx.recv() => {
                        let Some((id, status, reply)) = msg else {
                            return;
                        };
                        let r = Self::respond_inner(store.as_ref(), &mut notifier, &id, status).await;
                        if notifier.shown().is_none() {
                            deadline = None;
                        }
                        state_tx.send_replace(notifier.state().clone());
                        let _ = reply.send(r);
                        continue;
                    }
                    _ = timer => {
                        if let Some(r) = notifier.shown().map(|r| r.id.clone()) {
                            debug!("Request {} timed out, left pending", r);
                            notifier.dismiss(&r);
                        }
                        deadline = None;
                    }
                }
                state_tx.send_replace(notifier.state().clone());
            }
        });

        Self {
            host_id: host_id.to_string(),
            state: state_rx,
            responses: resp_tx,
            _task: AbortOnDrop(handle),
        }
    }

    async fn respond_inner(
        store: &dyn LiveStore,
        notifier: &mut RequestNotifier,
        id: &str,
        status: RequestStatus,
    ) -> Result<()> {
        if status == RequestStatus::Pending {
            bail!("A request can only be approved or rejected");
        }
        // hide first, the popup must not wait for the write
        if notifier.shown().map(|r| r.id == id).unwrap_or(false) {
            notifier.respond(status)?;
        }
        store.set_request_status(id, status).await?;
        info!("Request {} {}", id, status);
        Ok(())
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn state(&self) -> PopupState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PopupState> {
        self.state.clone()
    }

    /// Persist the hosts response to [id] and hide it if shown
    pub async fn respond(&self, id: &str, status: RequestStatus) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .send((id.to_string(), status, tx))
            .await
            .map_err(|_| anyhow!("Request popup closed"))?;
        rx.await.map_err(|_| anyhow!("Request popup closed"))?
    }
}

/// One [RequestPopup] per host, shared by all of that hosts connections
pub struct RequestPopups {
    store: SharedStore,
    registry: SubscriptionRegistry<LatestPendingRequest>,
    active: Mutex<HashMap<String, Weak<RequestPopup>>>,
}

impl RequestPopups {
    pub fn new(store: SharedStore) -> Self {
        Self {
            registry: SubscriptionRegistry::new(store.clone()),
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_spawn(&self, host_id: &str) -> Arc<RequestPopup> {
        let mut active = match self.active.lock() {
            Ok(a) => a,
            Err(p) => p.into_inner(),
        };
        active.retain(|_, v| v.strong_count() > 0);
        if let Some(p) = active.get(host_id).and_then(|w| w.upgrade()) {
            return p;
        }
        let popup = Arc::new(RequestPopup::spawn(
            self.store.clone(),
            &self.registry,
            host_id,
        ));
        active.insert(host_id.to_string(), Arc::downgrade(&popup));
        popup
    }

    pub fn get(&self, host_id: &str) -> Option<Arc<RequestPopup>> {
        self.active
            .lock()
            .ok()
            .and_then(|a| a.get(host_id).and_then(|w| w.upgrade()))
    }

    /// Persist a response, through the hosts popup when one is open
    pub async fn respond(&self, host_id: &str, id: &str, status: RequestStatus) -> Result<()> {
        match self.get(host_id) {
            Some(popup) => popup.respond(id, status).await,
            None => {
                if status == RequestStatus::Pending {
                    bail!("A request can only be approved or rejected");
                }
                self.store.set_request_status(id, status).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zap_live_db::{Host, MemoryStore};

    fn request(id: &str, age_secs: i64, now: DateTime<Utc>) -> StreamRequest {
        StreamRequest {
            id: id.to_string(),
            host_id: "h1".to_string(),
            user_id: "u1".to_string(),
            user_name: Some("viewer".to_string()),
            kind: RequestKind::PrivateCall,
            status: RequestStatus::Pending,
            timestamp: now - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_fresh_request_shown() {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        assert!(n.observe(Some(request("r1", 10, now)), now));
        assert_eq!(n.shown().map(|r| r.id.as_str()), Some("r1"));
    }

    #[test]
    fn test_stale_request_not_shown() {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        assert!(!n.observe(Some(request("r1", 40, now)), now));
        assert_eq!(n.state(), &PopupState::Idle);
    }

    #[test]
    fn test_respond_hides_immediately() -> Result<()> {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        n.observe(Some(request("r1", 1, now)), now);
        assert_eq!(n.respond(RequestStatus::Approved)?, Some("r1".to_string()));
        assert_eq!(n.state(), &PopupState::Idle);
        assert!(n.respond(RequestStatus::Pending).is_err());
        Ok(())
    }

    #[test]
    fn test_dismissed_request_not_shown_again() {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        n.observe(Some(request("r1", 0, now)), now);
        assert!(n.dismiss("r1"));
        assert!(!n.dismiss("r1"));
        assert_eq!(n.state(), &PopupState::Idle);
        assert!(!n.observe(Some(request("r1", 0, now)), now + chrono::Duration::seconds(6)));
    }

    #[test]
    fn test_timed_out_request_not_reshown_after_newer_answered() -> Result<()> {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        assert!(n.observe(Some(request("r1", 0, now)), now));
        n.dismiss("r1");

        let later = now + chrono::Duration::seconds(6);
        assert!(n.observe(Some(request("r2", 0, later)), later));
        assert_eq!(n.respond(RequestStatus::Approved)?, Some("r2".to_string()));

        // r1 is the latest pending request again, still inside the freshness window
        let again = now + chrono::Duration::seconds(7);
        assert!(!n.observe(Some(request("r1", 0, now)), again));
        assert_eq!(n.state(), &PopupState::Idle);
        Ok(())
    }

    #[test]
    fn test_seen_ids_are_bounded() {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        for i in 0..SEEN_CAPACITY + 1 {
            assert!(n.observe(Some(request(&format!("r{}", i), 0, now)), now));
        }
        assert_eq!(n.seen.len(), SEEN_CAPACITY);
        assert!(!n.was_seen("r0"));
        assert!(n.was_seen(&format!("r{}", SEEN_CAPACITY)));
    }

    #[test]
    fn test_newer_request_replaces_shown() {
        let now = Utc::now();
        let mut n = RequestNotifier::new();
        n.observe(Some(request("r1", 5, now)), now);
        assert!(n.observe(Some(request("r2", 0, now)), now));
        assert_eq!(n.shown().map(|r| r.id.as_str()), Some("r2"));
        n.observe(None, now);
        assert_eq!(n.state(), &PopupState::Idle);
    }

    async fn setup() -> Result<(MemoryStore, SharedStore)> {
        let store = MemoryStore::new();
        store
            .upsert_host(&Host::new("h1", "Host", Utc::now()))
            .await?;
        let shared: SharedStore = Arc::new(store.clone());
        Ok((store, shared))
    }

    async fn wait_for<F: Fn(&PopupState) -> bool>(
        rx: &mut watch::Receiver<PopupState>,
        f: F,
    ) -> Result<PopupState> {
        let s = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| f(s))).await??;
        Ok(s.clone())
    }

    #[tokio::test]
    async fn test_popup_respond_persists() -> Result<()> {
        let (store, shared) = setup().await?;
        let popups = RequestPopups::new(shared);
        let popup = popups.get_or_spawn("h1");
        let mut rx = popup.watch();

        let req = create_request(
            &store,
            "h1",
            "u1",
            None,
            RequestKind::PrivateCall,
            Utc::now(),
        )
        .await?;
        wait_for(&mut rx, |s| matches!(s, PopupState::Shown { .. })).await?;

        popups.respond("h1", &req.id, RequestStatus::Approved).await?;
        assert_eq!(popup.state(), PopupState::Idle);
        assert_eq!(
            store.get_stream_request(&req.id).await?.map(|r| r.status),
            Some(RequestStatus::Approved)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_times_out_leaving_pending() -> Result<()> {
        let (store, shared) = setup().await?;
        let popups = RequestPopups::new(shared);
        let popup = popups.get_or_spawn("h1");
        let mut rx = popup.watch();

        let req = create_request(&store, "h1", "u1", None, RequestKind::Zap, Utc::now()).await?;
        wait_for(&mut rx, |s| matches!(s, PopupState::Shown { .. })).await?;

        tokio::time::sleep(POPUP_DISPLAY + Duration::from_millis(10)).await;
        wait_for(&mut rx, |s| *s == PopupState::Idle).await?;
        assert_eq!(
            store.get_stream_request(&req.id).await?.map(|r| r.status),
            Some(RequestStatus::Pending)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_popups_shared_per_host() -> Result<()> {
        let (_, shared) = setup().await?;
        let popups = RequestPopups::new(shared);
        let a = popups.get_or_spawn("h1");
        let b = popups.get_or_spawn("h1");
        assert!(Arc::ptr_eq(&a, &b));
        drop(a);
        drop(b);
        assert!(popups.get("h1").is_none());
        Ok(())
    }
}
