use crate::{HasAuthSecret, ImageRequest, SessionAuth};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zap_live_ai::{ErrorReport, ModerationVerdict};
use zap_live_db::{AdminMessage, Host, PayoutRequest, PayoutStatus};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminHostRequest {
    pub is_banned: Option<bool>,
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModerationResult {
    pub verdict: ModerationVerdict,
    /// Blur was enforced and the host was notified
    pub actioned: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorReportRequest {
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[async_trait]
pub trait ZapLiveAdminApi: HasAuthSecret + Clone + Send + Sync {
    async fn get_payouts(
        &self,
        auth: SessionAuth,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutRequest>>;

    async fn mark_payout_paid(&self, auth: SessionAuth, id: String) -> Result<PayoutRequest>;

    async fn update_host(
        &self,
        auth: SessionAuth,
        id: String,
        req: AdminHostRequest,
    ) -> Result<Host>;

    async fn send_message(
        &self,
        auth: SessionAuth,
        id: String,
        req: AdminMessageRequest,
    ) -> Result<AdminMessage>;

    async fn moderate_host(
        &self,
        auth: SessionAuth,
        id: String,
        req: ImageRequest,
    ) -> Result<ModerationResult>;

    async fn error_report(
        &self,
        auth: SessionAuth,
        req: ErrorReportRequest,
    ) -> Result<Vec<ErrorReport>>;
}
