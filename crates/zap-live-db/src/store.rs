use crate::{
    AdminMessage, Host, HostPatch, PayoutRequest, PayoutStatus, RequestStatus, StreamRequest,
    StreamSession, Transaction, User,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Document collections, used for paths and change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Users,
    Hosts,
    StreamRequests,
    StreamSessions,
    Transactions,
    PayoutRequests,
    AdminMessages,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Hosts => "hosts",
            Collection::StreamRequests => "streamRequests",
            Collection::StreamSessions => "streamSessions",
            Collection::Transactions => "transactions",
            Collection::PayoutRequests => "payoutRequests",
            Collection::AdminMessages => "adminMessages",
        }
    }

    /// Document path `{collection}/{id}`
    pub fn path(&self, id: &str) -> String {
        format!("{}/{}", self.as_str(), id)
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
    Write,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Get => write!(f, "get"),
            Operation::List => write!(f, "list"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Write => write!(f, "write"),
        }
    }
}

/// A write rejected by the access rules of the backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionError {
    pub path: String,
    pub operation: Operation,
    /// The data which was attempted to be written
    pub request_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteError {
    PermissionDenied(PermissionError),
    Other { message: String },
}

impl WriteError {
    pub fn other(msg: impl ToString) -> Self {
        WriteError::Other {
            message: msg.to_string(),
        }
    }

    pub fn permission(&self) -> Option<&PermissionError> {
        match self {
            WriteError::PermissionDenied(p) => Some(p),
            WriteError::Other { .. } => None,
        }
    }
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::PermissionDenied(p) => write!(
                f,
                "Missing or insufficient permissions: {} on {}",
                p.operation, p.path
            ),
            WriteError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for WriteError {}

pub type WriteResult<T = ()> = std::result::Result<T, WriteError>;

/// Broadcasts which collection changed after every successful write
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Collection>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn notify(&self, collection: Collection) {
        // no receivers is fine
        let _ = self.tx.send(collection);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Collection> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// The document database which holds all application state.
///
/// Writes are independent per-field updates or upserts, there is no
/// multi-document transaction and no compare-and-swap: last writer wins.
#[async_trait]
pub trait LiveStore: Send + Sync {
    /// Receiver of collection change notifications
    fn changes(&self) -> broadcast::Receiver<Collection>;

    async fn get_user(&self, uid: &str) -> Result<Option<User>>;
    async fn upsert_user(&self, user: &User) -> WriteResult;
    /// Add [diff] to a users coin balance
    async fn increment_user_coins(&self, uid: &str, diff: f64) -> WriteResult;
    /// Add [diff] to both `coins` and `referralEarnings`
    async fn increment_referral_earnings(&self, uid: &str, diff: f64) -> WriteResult;

    async fn get_host(&self, id: &str) -> Result<Option<Host>>;
    async fn list_hosts(&self) -> Result<Vec<Host>>;
    /// All hosts with `isLive = true`
    async fn list_live_hosts(&self) -> Result<Vec<Host>>;
    async fn upsert_host(&self, host: &Host) -> WriteResult;
    async fn update_host(&self, id: &str, patch: &HostPatch) -> WriteResult;
    async fn increment_host_earnings(&self, id: &str, diff: f64) -> WriteResult;
    async fn increment_referral_count(&self, id: &str) -> WriteResult;

    async fn get_session(&self, id: &str) -> Result<Option<StreamSession>>;
    /// Merge the session document keyed by its id
    async fn upsert_session(&self, session: &StreamSession) -> WriteResult;

    async fn append_transaction(&self, tx: &Transaction) -> WriteResult;
    /// Most recent transactions paid to a host
    async fn list_host_transactions(&self, host_id: &str, limit: u64) -> Result<Vec<Transaction>>;
    /// Most recent transactions paid by a user
    async fn list_user_transactions(&self, uid: &str, limit: u64) -> Result<Vec<Transaction>>;

    async fn create_stream_request(&self, req: &StreamRequest) -> WriteResult;
    async fn get_stream_request(&self, id: &str) -> Result<Option<StreamRequest>>;
    /// Most recent pending request for a host
    async fn latest_pending_request(&self, host_id: &str) -> Result<Option<StreamRequest>>;
    async fn set_request_status(&self, id: &str, status: RequestStatus) -> WriteResult;

    async fn create_payout(&self, payout: &PayoutRequest) -> WriteResult;
    async fn get_payout(&self, id: &str) -> Result<Option<PayoutRequest>>;
    /// Payout requests ordered by request time, oldest first
    async fn list_payouts(&self, status: Option<PayoutStatus>) -> Result<Vec<PayoutRequest>>;
    async fn mark_payout_paid(&self, id: &str, paid_at: DateTime<Utc>) -> WriteResult;

    async fn send_admin_message(&self, msg: &AdminMessage) -> WriteResult;
    async fn latest_admin_message(&self, host_id: &str) -> Result<Option<AdminMessage>>;
}

pub type SharedStore = Arc<dyn LiveStore>;
