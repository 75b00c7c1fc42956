use crate::broadcast::BroadcastManager;
use crate::moderation::{
    ban_host, error_report, moderate_frame, send_directive, unban_host, verify_host,
};
use crate::payouts::mark_paid;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use zap_live_ai::{ErrorReport, Media, PromptModel};
use zap_live_api_common::*;
use zap_live_db::{AdminMessage, Host, PayoutRequest, PayoutStatus, SharedStore};

#[derive(Clone)]
pub struct ZapLiveAdminApiImpl {
    store: SharedStore,
    auth_secret: String,
    /// Session uids with admin access
    admins: Vec<String>,
    broadcasts: BroadcastManager,
    model: Arc<dyn PromptModel>,
}

impl ZapLiveAdminApiImpl {
    pub fn new(
        store: SharedStore,
        auth_secret: String,
        admins: Vec<String>,
        broadcasts: BroadcastManager,
        model: Arc<dyn PromptModel>,
    ) -> Self {
        Self {
            store,
            auth_secret,
            admins,
            broadcasts,
            model,
        }
    }

    fn check_admin_access(&self, auth: &SessionAuth) -> Result<()> {
        if self.admins.iter().any(|a| *a == auth.uid) {
            return Ok(());
        }
        Err(AccessDenied("Admin privileges required".to_string()).into())
    }
}

impl HasAuthSecret for ZapLiveAdminApiImpl {
    fn auth_secret(&self) -> &str {
        &self.auth_secret
    }
}

#[async_trait]
impl ZapLiveAdminApi for ZapLiveAdminApiImpl {
    async fn get_payouts(
        &self,
        auth: SessionAuth,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutRequest>> {
        self.check_admin_access(&auth)?;
        self.store.list_payouts(status).await
    }

    async fn mark_payout_paid(&self, auth: SessionAuth, id: String) -> Result<PayoutRequest> {
        self.check_admin_access(&auth)?;
        let payout = mark_paid(self.store.as_ref(), &id, Utc::now()).await?;
        info!("Admin {} paid out {}", auth.uid, id);
        Ok(payout)
    }

    async fn update_host(
        &self,
        auth: SessionAuth,
        id: String,
        req: AdminHostRequest,
    ) -> Result<Host> {
        self.check_admin_access(&auth)?;
        match req.is_banned {
            Some(true) => {
                if self.broadcasts.is_live(&id).await {
                    self.broadcasts.end(&id).await?;
                }
                ban_host(self.store.as_ref(), &id, &auth.uid, Utc::now()).await?;
            }
            Some(false) => unban_host(self.store.as_ref(), &id, &auth.uid).await?,
            None => {}
        }
        if let Some(v) = req.verified {
            verify_host(self.store.as_ref(), &id, v).await?;
        }
        self.store
            .get_host(&id)
            .await?
            .ok_or_else(|| anyhow!("Host not found"))
    }

    async fn send_message(
        &self,
        auth: SessionAuth,
        id: String,
        req: AdminMessageRequest,
    ) -> Result<AdminMessage> {
        self.check_admin_access(&auth)?;
        send_directive(self.store.as_ref(), &id, &auth.uid, &req.content, Utc::now()).await
    }

    async fn moderate_host(
        &self,
        auth: SessionAuth,
        id: String,
        req: ImageRequest,
    ) -> Result<ModerationResult> {
        self.check_admin_access(&auth)?;
        let image = Media::from_data_uri(&req.image)?;
        let out = moderate_frame(
            self.store.as_ref(),
            self.model.as_ref(),
            &id,
            &image,
            &auth.uid,
            Utc::now(),
        )
        .await?;
        Ok(ModerationResult {
            verdict: out.verdict,
            actioned: out.actioned,
        })
    }

    async fn error_report(
        &self,
        auth: SessionAuth,
        req: ErrorReportRequest,
    ) -> Result<Vec<ErrorReport>> {
        self.check_admin_access(&auth)?;
        error_report(self.model.as_ref(), &req.logs, &req.issues).await
    }
}
