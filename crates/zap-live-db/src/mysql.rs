use crate::{
    AdminMessage, ChangeFeed, Collection, Host, HostPatch, LiveStore, Operation, PayoutRequest,
    PayoutStatus, PermissionError, RequestStatus, StreamRequest, StreamSession, Transaction, User,
    WriteError, WriteResult,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::mysql::{MySqlDatabaseError, MySqlQueryResult};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tokio::sync::broadcast;
use tracing::warn;

/// MySQL error numbers raised when a grant does not allow the statement
const ACCESS_DENIED_ERRORS: [u16; 4] = [1044, 1045, 1142, 1143];

#[derive(Clone)]
pub struct MySqlStore {
    db: MySqlPool,
    changes: ChangeFeed,
}

impl MySqlStore {
    pub async fn new(db: &str) -> Result<Self> {
        let db = MySqlPool::connect(db).await?;
        Ok(MySqlStore {
            db,
            changes: ChangeFeed::new(),
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.db).await?;
        Ok(())
    }

    /// Map a statement result into a [WriteResult], notifying listeners on success
    fn finish<T: Serialize>(
        &self,
        res: std::result::Result<MySqlQueryResult, sqlx::Error>,
        collection: Collection,
        id: &str,
        operation: Operation,
        data: &T,
    ) -> WriteResult {
        let path = collection.path(id);
        match res {
            Ok(r) if operation == Operation::Update && r.rows_affected() == 0 => Err(
                WriteError::other(format!("No document to update: {}", path)),
            ),
            Ok(_) => {
                self.changes.notify(collection);
                Ok(())
            }
            Err(sqlx::Error::Database(e))
                if e.try_downcast_ref::<MySqlDatabaseError>()
                    .map(|m| ACCESS_DENIED_ERRORS.contains(&m.number()))
                    .unwrap_or(false) =>
            {
                warn!("Write denied: {} on {}: {}", operation, path, e);
                Err(WriteError::PermissionDenied(PermissionError {
                    path,
                    operation,
                    request_data: serde_json::to_value(data).ok(),
                }))
            }
            Err(e) => Err(WriteError::other(e)),
        }
    }
}

#[async_trait]
impl LiveStore for MySqlStore {
    fn changes(&self) -> broadcast::Receiver<Collection> {
        self.changes.subscribe()
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as("select * from user where id = ?")
            .bind(uid)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn upsert_user(&self, user: &User) -> WriteResult {
        let res = sqlx::query(
            "insert into user (id, coins, referral_earnings, created_at, updated_at) values (?, ?, ?, ?, ?) \
             on duplicate key update coins = values(coins), referral_earnings = values(referral_earnings), updated_at = values(updated_at)",
        )
        .bind(&user.id)
        .bind(user.coins)
        .bind(user.referral_earnings)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db)
        .await;
        self.finish(res, Collection::Users, &user.id, Operation::Write, user)
    }

    async fn increment_user_coins(&self, uid: &str, diff: f64) -> WriteResult {
        let res = sqlx::query("update user set coins = coins + ?, updated_at = now() where id = ?")
            .bind(diff)
            .bind(uid)
            .execute(&self.db)
            .await;
        self.finish(
            res,
            Collection::Users,
            uid,
            Operation::Update,
            &serde_json::json!({ "coins": { "increment": diff } }),
        )
    }

    async fn increment_referral_earnings(&self, uid: &str, diff: f64) -> WriteResult {
        let res = sqlx::query(
            "update user set coins = coins + ?, referral_earnings = referral_earnings + ?, updated_at = now() where id = ?",
        )
        .bind(diff)
        .bind(diff)
        .bind(uid)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::Users,
            uid,
            Operation::Update,
            &serde_json::json!({
                "referralEarnings": { "increment": diff },
                "coins": { "increment": diff }
            }),
        )
    }

    async fn get_host(&self, id: &str) -> Result<Option<Host>> {
        Ok(sqlx::query_as("select * from host where id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(sqlx::query_as("select * from host order by created_at")
            .fetch_all(&self.db)
            .await?)
    }

    async fn list_live_hosts(&self) -> Result<Vec<Host>> {
        Ok(
            sqlx::query_as("select * from host where is_live = true order by created_at")
                .fetch_all(&self.db)
                .await?,
        )
    }

    async fn upsert_host(&self, host: &Host) -> WriteResult {
        let res = sqlx::query(
            "insert into host (id, name, bio, avatar, tags, earnings, is_live, is_banned, verified, stream_type, manual_blur, rating, referral_count, referred_by, upi_id, created_at, updated_at) \
             values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             on duplicate key update name = values(name), bio = values(bio), avatar = values(avatar), tags = values(tags), earnings = values(earnings), \
             is_live = values(is_live), is_banned = values(is_banned), verified = values(verified), stream_type = values(stream_type), \
             manual_blur = values(manual_blur), rating = values(rating), referral_count = values(referral_count), referred_by = values(referred_by), \
             upi_id = values(upi_id), updated_at = values(updated_at)",
        )
        .bind(&host.id)
        .bind(&host.name)
        .bind(&host.bio)
        .bind(&host.avatar)
        .bind(&host.tags)
        .bind(host.earnings)
        .bind(host.is_live)
        .bind(host.is_banned)
        .bind(host.verified)
        .bind(host.stream_type)
        .bind(host.manual_blur)
        .bind(host.rating)
        .bind(host.referral_count)
        .bind(&host.referred_by)
        .bind(&host.payment_details.upi_id)
        .bind(host.created_at)
        .bind(host.updated_at)
        .execute(&self.db)
        .await;
        self.finish(res, Collection::Hosts, &host.id, Operation::Write, host)
    }

    async fn update_host(&self, id: &str, patch: &HostPatch) -> WriteResult {
        let mut q: QueryBuilder<MySql> = QueryBuilder::new("update host set updated_at = now()");
        if let Some(v) = patch.is_live {
            q.push(", is_live = ").push_bind(v);
        }
        if let Some(v) = patch.is_banned {
            q.push(", is_banned = ").push_bind(v);
        }
        if let Some(v) = patch.verified {
            q.push(", verified = ").push_bind(v);
        }
        if let Some(v) = patch.stream_type {
            q.push(", stream_type = ").push_bind(v);
        }
        if let Some(v) = patch.manual_blur {
            q.push(", manual_blur = ").push_bind(v);
        }
        if let Some(v) = &patch.upi_id {
            q.push(", upi_id = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.bio {
            q.push(", bio = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.tags {
            q.push(", tags = ").push_bind(v.clone());
        }
        q.push(" where id = ").push_bind(id);
        let res = q.build().execute(&self.db).await;
        self.finish(res, Collection::Hosts, id, Operation::Update, patch)
    }

    async fn increment_host_earnings(&self, id: &str, diff: f64) -> WriteResult {
        let res =
            sqlx::query("update host set earnings = earnings + ?, updated_at = now() where id = ?")
                .bind(diff)
                .bind(id)
                .execute(&self.db)
                .await;
        self.finish(
            res,
            Collection::Hosts,
            id,
            Operation::Update,
            &serde_json::json!({ "earnings": { "increment": diff } }),
        )
    }

    async fn increment_referral_count(&self, id: &str) -> WriteResult {
        let res = sqlx::query(
            "update host set referral_count = referral_count + 1, updated_at = now() where id = ?",
        )
        .bind(id)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::Hosts,
            id,
            Operation::Update,
            &serde_json::json!({ "referralCount": { "increment": 1 } }),
        )
    }

    async fn get_session(&self, id: &str) -> Result<Option<StreamSession>> {
        Ok(sqlx::query_as("select * from stream_session where id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn upsert_session(&self, session: &StreamSession) -> WriteResult {
        let res = sqlx::query(
            "insert into stream_session (id, user_id, host_id, expires_at, status, updated_at) values (?, ?, ?, ?, ?, ?) \
             on duplicate key update expires_at = values(expires_at), status = values(status), updated_at = values(updated_at)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.host_id)
        .bind(session.expires_at)
        .bind(session.status)
        .bind(session.updated_at)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::StreamSessions,
            &session.id,
            Operation::Write,
            session,
        )
    }

    async fn append_transaction(&self, tx: &Transaction) -> WriteResult {
        let res = sqlx::query(
            "insert into transaction_log (id, from_id, to_id, amount, payment_type, timestamp) values (?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.id)
        .bind(&tx.from)
        .bind(&tx.to)
        .bind(tx.amount)
        .bind(tx.payment_type)
        .bind(tx.timestamp)
        .execute(&self.db)
        .await;
        self.finish(res, Collection::Transactions, &tx.id, Operation::Create, tx)
    }

    async fn list_host_transactions(&self, host_id: &str, limit: u64) -> Result<Vec<Transaction>> {
        Ok(sqlx::query_as(
            "select * from transaction_log where to_id = ? order by timestamp desc limit ?",
        )
        .bind(host_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?)
    }

    async fn list_user_transactions(&self, uid: &str, limit: u64) -> Result<Vec<Transaction>> {
        Ok(sqlx::query_as(
            "select * from transaction_log where from_id = ? order by timestamp desc limit ?",
        )
        .bind(uid)
        .bind(limit)
        .fetch_all(&self.db)
        .await?)
    }

    async fn create_stream_request(&self, req: &StreamRequest) -> WriteResult {
        let res = sqlx::query(
            "insert into stream_request (id, host_id, user_id, user_name, kind, status, timestamp) values (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&req.id)
        .bind(&req.host_id)
        .bind(&req.user_id)
        .bind(&req.user_name)
        .bind(req.kind)
        .bind(req.status)
        .bind(req.timestamp)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::StreamRequests,
            &req.id,
            Operation::Create,
            req,
        )
    }

    async fn get_stream_request(&self, id: &str) -> Result<Option<StreamRequest>> {
        Ok(sqlx::query_as("select * from stream_request where id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn latest_pending_request(&self, host_id: &str) -> Result<Option<StreamRequest>> {
        Ok(sqlx::query_as(
            "select * from stream_request where host_id = ? and status = ? order by timestamp desc limit 1",
        )
        .bind(host_id)
        .bind(RequestStatus::Pending)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn set_request_status(&self, id: &str, status: RequestStatus) -> WriteResult {
        let res = sqlx::query("update stream_request set status = ? where id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.db)
            .await;
        self.finish(
            res,
            Collection::StreamRequests,
            id,
            Operation::Update,
            &serde_json::json!({ "status": status }),
        )
    }

    async fn create_payout(&self, payout: &PayoutRequest) -> WriteResult {
        let res = sqlx::query(
            "insert into payout_request (id, host_id, host_name, amount_diamonds, amount_cash, status, upi_id, requested_at, paid_at) values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&payout.id)
        .bind(&payout.host_id)
        .bind(&payout.host_name)
        .bind(payout.amount_diamonds)
        .bind(payout.amount_cash)
        .bind(payout.status)
        .bind(&payout.payment_details.upi_id)
        .bind(payout.requested_at)
        .bind(payout.paid_at)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::PayoutRequests,
            &payout.id,
            Operation::Create,
            payout,
        )
    }

    async fn get_payout(&self, id: &str) -> Result<Option<PayoutRequest>> {
        Ok(sqlx::query_as("select * from payout_request where id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn list_payouts(&self, status: Option<PayoutStatus>) -> Result<Vec<PayoutRequest>> {
        Ok(match status {
            Some(s) => {
                sqlx::query_as(
                    "select * from payout_request where status = ? order by requested_at",
                )
                .bind(s)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as("select * from payout_request order by requested_at")
                    .fetch_all(&self.db)
                    .await?
            }
        })
    }

    async fn mark_payout_paid(&self, id: &str, paid_at: DateTime<Utc>) -> WriteResult {
        let res = sqlx::query("update payout_request set status = ?, paid_at = ? where id = ?")
            .bind(PayoutStatus::Paid)
            .bind(paid_at)
            .bind(id)
            .execute(&self.db)
            .await;
        self.finish(
            res,
            Collection::PayoutRequests,
            id,
            Operation::Update,
            &serde_json::json!({ "status": PayoutStatus::Paid, "paidAt": paid_at }),
        )
    }

    async fn send_admin_message(&self, msg: &AdminMessage) -> WriteResult {
        let res = sqlx::query(
            "insert into admin_message (id, host_id, content, sender, kind, timestamp) values (?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.host_id)
        .bind(&msg.content)
        .bind(&msg.sender)
        .bind(msg.kind)
        .bind(msg.timestamp)
        .execute(&self.db)
        .await;
        self.finish(
            res,
            Collection::AdminMessages,
            &msg.id,
            Operation::Create,
            msg,
        )
    }

    async fn latest_admin_message(&self, host_id: &str) -> Result<Option<AdminMessage>> {
        Ok(sqlx::query_as(
            "select * from admin_message where host_id = ? order by timestamp desc limit 1",
        )
        .bind(host_id)
        .fetch_optional(&self.db)
        .await?)
    }
}
