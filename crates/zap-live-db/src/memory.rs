use crate::{
    AdminMessage, ChangeFeed, Collection, Host, HostPatch, LiveStore, Operation, PayoutRequest,
    PayoutStatus, PermissionError, RequestStatus, StreamRequest, StreamSession, Transaction, User,
    WriteError, WriteResult,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

/// A single write issued against the store, recorded whether it was accepted or not
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub path: String,
    pub operation: Operation,
    pub data: serde_json::Value,
}

#[derive(Default)]
struct Documents {
    users: HashMap<String, User>,
    hosts: HashMap<String, Host>,
    requests: HashMap<String, StreamRequest>,
    sessions: HashMap<String, StreamSession>,
    transactions: Vec<Transaction>,
    payouts: HashMap<String, PayoutRequest>,
    messages: Vec<AdminMessage>,
}

/// In-process document store used for development and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<Documents>>,
    /// Path prefixes where all writes are rejected
    deny: Arc<Mutex<Vec<String>>>,
    writes: Arc<Mutex<Vec<WriteCall>>>,
    changes: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write to a path starting with [prefix]
    pub fn deny_writes(&self, prefix: &str) {
        if let Ok(mut d) = self.deny.lock() {
            d.push(prefix.to_string());
        }
    }

    pub fn allow_all(&self) {
        if let Ok(mut d) = self.deny.lock() {
            d.clear();
        }
    }

    /// All writes issued so far, including rejected ones
    pub fn write_log(&self) -> Vec<WriteCall> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn check<T: Serialize>(&self, path: String, operation: Operation, data: &T) -> WriteResult {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        if let Ok(mut w) = self.writes.lock() {
            w.push(WriteCall {
                path: path.clone(),
                operation,
                data: data.clone(),
            });
        }
        let denied = self
            .deny
            .lock()
            .map(|d| d.iter().any(|p| path.starts_with(p.as_str())))
            .unwrap_or(false);
        if denied {
            warn!("Write denied: {} on {}", operation, path);
            return Err(WriteError::PermissionDenied(PermissionError {
                path,
                operation,
                request_data: Some(data),
            }));
        }
        Ok(())
    }

    fn missing(path: &str) -> WriteError {
        WriteError::other(format!("No document to update: {}", path))
    }
}

#[async_trait]
impl LiveStore for MemoryStore {
    fn changes(&self) -> broadcast::Receiver<Collection> {
        self.changes.subscribe()
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.docs.read().await.users.get(uid).cloned())
    }

    async fn upsert_user(&self, user: &User) -> WriteResult {
        self.check(Collection::Users.path(&user.id), Operation::Write, user)?;
        self.docs
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        self.changes.notify(Collection::Users);
        Ok(())
    }

    async fn increment_user_coins(&self, uid: &str, diff: f64) -> WriteResult {
        let path = Collection::Users.path(uid);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({ "coins": { "increment": diff } }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let user = docs.users.get_mut(uid).ok_or_else(|| Self::missing(&path))?;
            user.coins += diff;
            user.updated_at = Utc::now();
        }
        self.changes.notify(Collection::Users);
        Ok(())
    }

    async fn increment_referral_earnings(&self, uid: &str, diff: f64) -> WriteResult {
        let path = Collection::Users.path(uid);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({
                "referralEarnings": { "increment": diff },
                "coins": { "increment": diff }
            }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let user = docs.users.get_mut(uid).ok_or_else(|| Self::missing(&path))?;
            user.referral_earnings += diff;
            user.coins += diff;
            user.updated_at = Utc::now();
        }
        self.changes.notify(Collection::Users);
        Ok(())
    }

    async fn get_host(&self, id: &str) -> Result<Option<Host>> {
        Ok(self.docs.read().await.hosts.get(id).cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let mut hosts: Vec<Host> = self.docs.read().await.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(hosts)
    }

    async fn list_live_hosts(&self) -> Result<Vec<Host>> {
        Ok(self
            .list_hosts()
            .await?
            .into_iter()
            .filter(|h| h.is_live)
            .collect())
    }

    async fn upsert_host(&self, host: &Host) -> WriteResult {
        self.check(Collection::Hosts.path(&host.id), Operation::Write, host)?;
        self.docs
            .write()
            .await
            .hosts
            .insert(host.id.clone(), host.clone());
        self.changes.notify(Collection::Hosts);
        Ok(())
    }

    async fn update_host(&self, id: &str, patch: &HostPatch) -> WriteResult {
        let path = Collection::Hosts.path(id);
        self.check(path.clone(), Operation::Update, patch)?;
        {
            let mut docs = self.docs.write().await;
            let host = docs.hosts.get_mut(id).ok_or_else(|| Self::missing(&path))?;
            patch.apply(host, Utc::now());
        }
        self.changes.notify(Collection::Hosts);
        Ok(())
    }

    async fn increment_host_earnings(&self, id: &str, diff: f64) -> WriteResult {
        let path = Collection::Hosts.path(id);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({ "earnings": { "increment": diff } }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let host = docs.hosts.get_mut(id).ok_or_else(|| Self::missing(&path))?;
            host.earnings += diff;
            host.updated_at = Utc::now();
        }
        self.changes.notify(Collection::Hosts);
        Ok(())
    }

    async fn increment_referral_count(&self, id: &str) -> WriteResult {
        let path = Collection::Hosts.path(id);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({ "referralCount": { "increment": 1 } }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let host = docs.hosts.get_mut(id).ok_or_else(|| Self::missing(&path))?;
            host.referral_count += 1;
            host.updated_at = Utc::now();
        }
        self.changes.notify(Collection::Hosts);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<StreamSession>> {
        Ok(self.docs.read().await.sessions.get(id).cloned())
    }

    async fn upsert_session(&self, session: &StreamSession) -> WriteResult {
        self.check(
            Collection::StreamSessions.path(&session.id),
            Operation::Write,
            session,
        )?;
        self.docs
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        self.changes.notify(Collection::StreamSessions);
        Ok(())
    }

    async fn append_transaction(&self, tx: &Transaction) -> WriteResult {
        self.check(Collection::Transactions.path(&tx.id), Operation::Create, tx)?;
        self.docs.write().await.transactions.push(tx.clone());
        self.changes.notify(Collection::Transactions);
        Ok(())
    }

    async fn list_host_transactions(&self, host_id: &str, limit: u64) -> Result<Vec<Transaction>> {
        let docs = self.docs.read().await;
        let mut txs: Vec<Transaction> = docs
            .transactions
            .iter()
            .filter(|t| t.to == host_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        txs.truncate(limit as usize);
        Ok(txs)
    }

    async fn list_user_transactions(&self, uid: &str, limit: u64) -> Result<Vec<Transaction>> {
        let docs = self.docs.read().await;
        let mut txs: Vec<Transaction> = docs
            .transactions
            .iter()
            .filter(|t| t.from == uid)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        txs.truncate(limit as usize);
        Ok(txs)
    }

    async fn create_stream_request(&self, req: &StreamRequest) -> WriteResult {
        self.check(
            Collection::StreamRequests.path(&req.id),
            Operation::Create,
            req,
        )?;
        self.docs
            .write()
            .await
            .requests
            .insert(req.id.clone(), req.clone());
        self.changes.notify(Collection::StreamRequests);
        Ok(())
    }

    async fn get_stream_request(&self, id: &str) -> Result<Option<StreamRequest>> {
        Ok(self.docs.read().await.requests.get(id).cloned())
    }

    async fn latest_pending_request(&self, host_id: &str) -> Result<Option<StreamRequest>> {
        Ok(self
            .docs
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.host_id == host_id && r.status == RequestStatus::Pending)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned())
    }

    async fn set_request_status(&self, id: &str, status: RequestStatus) -> WriteResult {
        let path = Collection::StreamRequests.path(id);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({ "status": status }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let req = docs
                .requests
                .get_mut(id)
                .ok_or_else(|| Self::missing(&path))?;
            req.status = status;
        }
        self.changes.notify(Collection::StreamRequests);
        Ok(())
    }

    async fn create_payout(&self, payout: &PayoutRequest) -> WriteResult {
        self.check(
            Collection::PayoutRequests.path(&payout.id),
            Operation::Create,
            payout,
        )?;
        self.docs
            .write()
            .await
            .payouts
            .insert(payout.id.clone(), payout.clone());
        self.changes.notify(Collection::PayoutRequests);
        Ok(())
    }

    async fn get_payout(&self, id: &str) -> Result<Option<PayoutRequest>> {
        Ok(self.docs.read().await.payouts.get(id).cloned())
    }

    async fn list_payouts(&self, status: Option<PayoutStatus>) -> Result<Vec<PayoutRequest>> {
        let docs = self.docs.read().await;
        let mut payouts: Vec<PayoutRequest> = docs
            .payouts
            .values()
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        payouts.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(payouts)
    }

    async fn mark_payout_paid(&self, id: &str, paid_at: DateTime<Utc>) -> WriteResult {
        let path = Collection::PayoutRequests.path(id);
        self.check(
            path.clone(),
            Operation::Update,
            &serde_json::json!({ "status": PayoutStatus::Paid, "paidAt": paid_at }),
        )?;
        {
            let mut docs = self.docs.write().await;
            let payout = docs
                .payouts
                .get_mut(id)
                .ok_or_else(|| Self::missing(&path))?;
            payout.status = PayoutStatus::Paid;
            payout.paid_at = Some(paid_at);
        }
        self.changes.notify(Collection::PayoutRequests);
        Ok(())
    }

    async fn send_admin_message(&self, msg: &AdminMessage) -> WriteResult {
        self.check(
            Collection::AdminMessages.path(&msg.id),
            Operation::Create,
            msg,
        )?;
        self.docs.write().await.messages.push(msg.clone());
        self.changes.notify(Collection::AdminMessages);
        Ok(())
    }

    async fn latest_admin_message(&self, host_id: &str) -> Result<Option<AdminMessage>> {
        Ok(self
            .docs
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.host_id == host_id)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned())
    }
}
