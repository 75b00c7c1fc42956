//! Live queries: continuously re-evaluated query results bound to a subscriber.
use crate::{
    AdminMessage, Collection, Host, LiveStore, PayoutRequest, PayoutStatus, SharedStore,
    StreamRequest, Transaction,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A query descriptor. Equal descriptors describe the same result set and
/// share one subscription in a [SubscriptionRegistry].
#[async_trait]
pub trait LiveQuery: Clone + Eq + Hash + Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Collection which triggers re-evaluation when it changes
    fn collection(&self) -> Collection;

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<Self::Item>>;
}

/// All currently live hosts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveHosts;

#[async_trait]
impl LiveQuery for LiveHosts {
    type Item = Host;

    fn collection(&self) -> Collection {
        Collection::Hosts
    }

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<Host>> {
        store.list_live_hosts().await
    }
}

/// Pending payout requests ordered by request time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingPayouts;

#[async_trait]
impl LiveQuery for PendingPayouts {
    type Item = PayoutRequest;

    fn collection(&self) -> Collection {
        Collection::PayoutRequests
    }

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<PayoutRequest>> {
        store.list_payouts(Some(PayoutStatus::Pending)).await
    }
}

/// Most recent admin message for a host (limit 1)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LatestAdminMessage {
    pub host_id: String,
}

#[async_trait]
impl LiveQuery for LatestAdminMessage {
    type Item = AdminMessage;

    fn collection(&self) -> Collection {
        Collection::AdminMessages
    }

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<AdminMessage>> {
        Ok(store
            .latest_admin_message(&self.host_id)
            .await?
            .into_iter()
            .collect())
    }
}

/// Most recent pending request for a host (limit 1)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LatestPendingRequest {
    pub host_id: String,
}

#[async_trait]
impl LiveQuery for LatestPendingRequest {
    type Item = StreamRequest;

    fn collection(&self) -> Collection {
        Collection::StreamRequests
    }

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<StreamRequest>> {
        Ok(store
            .latest_pending_request(&self.host_id)
            .await?
            .into_iter()
            .collect())
    }
}

/// Most recent transactions paid to a host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostTransactions {
    pub host_id: String,
    pub limit: u64,
}

#[async_trait]
impl LiveQuery for HostTransactions {
    type Item = Transaction;

    fn collection(&self) -> Collection {
        Collection::Transactions
    }

    async fn fetch(&self, store: &dyn LiveStore) -> Result<Vec<Transaction>> {
        store.list_host_transactions(&self.host_id, self.limit).await
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub docs: Vec<T>,
    /// True until the first fetch completes
    pub is_loading: bool,
    /// Error from the most recent fetch, [docs] keeps the last good result
    pub error: Option<String>,
}

impl<T> Snapshot<T> {
    /// Same snapshot with [f] applied to the result set
    pub fn map<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Snapshot<U> {
        Snapshot {
            docs: f(self.docs),
            is_loading: self.is_loading,
            error: self.error,
        }
    }

    fn loading() -> Self {
        Self {
            docs: Vec::new(),
            is_loading: true,
            error: None,
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Shared<T> {
    rx: watch::Receiver<Snapshot<T>>,
    _task: AbortOnDrop,
}

/// Handle to a live query, the underlying task stops when the last handle is dropped
pub struct Subscription<T> {
    inner: Arc<Shared<T>>,
    rx: watch::Receiver<Snapshot<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            rx: self.inner.rx.clone(),
        }
    }
}

impl<T: Clone> Subscription<T> {
    /// Current result set
    pub fn snapshot(&self) -> Snapshot<T> {
        self.rx.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_loading
    }

    /// Receiver of every re-evaluation, only valid while this handle is held
    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.rx.clone()
    }

    /// Wait for the next re-evaluation
    pub async fn changed(&mut self) -> Result<Snapshot<T>> {
        if self.rx.changed().await.is_err() {
            bail!("Subscription closed");
        }
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the initial fetch has completed
    pub async fn ready(&mut self) -> Result<Snapshot<T>> {
        loop {
            {
                let s = self.rx.borrow_and_update();
                if !s.is_loading {
                    return Ok(s.clone());
                }
            }
            if self.rx.changed().await.is_err() {
                bail!("Subscription closed");
            }
        }
    }
}

/// Start a live query against [store]
pub fn subscribe<Q: LiveQuery>(store: SharedStore, query: Q) -> Subscription<Q::Item> {
    let (tx, rx) = watch::channel(Snapshot::loading());
    // listen before the first fetch so no change is missed in between
    let mut changes = store.changes();
    let collection = query.collection();
    let handle = tokio::spawn(async move {
        loop {
            match query.fetch(store.as_ref()).await {
                Ok(docs) => {
                    tx.send_replace(Snapshot {
                        docs,
                        is_loading: false,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Live query on {} failed: {}", collection, e);
                    tx.send_modify(|s| {
                        s.is_loading = false;
                        s.error = Some(e.to_string());
                    });
                }
            }

            loop {
                match changes.recv().await {
                    Ok(c) if c == collection => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        debug!("Live query on {} lagged {} changes", collection, n);
                        break;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    });
    let inner = Arc::new(Shared {
        rx: rx.clone(),
        _task: AbortOnDrop(handle),
    });
    Subscription { inner, rx }
}

/// Shares subscriptions between callers which use equal query descriptors
pub struct SubscriptionRegistry<Q: LiveQuery> {
    store: SharedStore,
    active: Mutex<HashMap<Q, Weak<Shared<Q::Item>>>>,
}

impl<Q: LiveQuery> SubscriptionRegistry<Q> {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, query: Q) -> Subscription<Q::Item> {
        let mut active = match self.active.lock() {
            Ok(a) => a,
            Err(p) => p.into_inner(),
        };
        active.retain(|_, v| v.strong_count() > 0);
        if let Some(inner) = active.get(&query).and_then(|w| w.upgrade()) {
            let rx = inner.rx.clone();
            return Subscription { inner, rx };
        }
        let sub = subscribe(self.store.clone(), query.clone());
        active.insert(query, Arc::downgrade(&sub.inner));
        sub
    }

    /// Number of distinct live queries currently running
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .map(|a| a.values().filter(|v| v.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
