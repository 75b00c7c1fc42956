use crate::broadcast::BroadcastManager;
use crate::hosts::{become_host, marketplace, resolve_host, update_stream_settings};
use crate::ledger::{Payment, PaymentReport, ZAP_AMOUNT, process_payment};
use crate::payouts::request_payout;
use crate::requests::{RequestPopups, create_request};
use crate::settings::Settings;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zap_live_ai::{
    CatalogEntry, FaceVerification, HostProfile, Media, ProfileSuggestions, PromptModel,
    Recommendation,
};
use zap_live_api_common::{
    AccountInfo, AnonymousSession, BecomeHostRequest, CreateStreamRequest, HasAuthSecret,
    HostInfo, ImageRequest, LatestMessage, LiveStatus, PatchHost, PayRequest, PayResponse,
    PaymentStepResult, RecommendRequest, RespondRequest, SessionAuth, ZapLiveApi,
};
use zap_live_db::{
    Host, PaymentType, PayoutRequest, SharedStore, StreamRequest, Transaction, User, WriteError,
};

/// Most history entries returned in one call
const MAX_HISTORY: u64 = 200;

#[derive(Clone)]
pub struct Api {
    store: SharedStore,
    settings: Settings,
    broadcasts: BroadcastManager,
    popups: Arc<RequestPopups>,
    model: Arc<dyn PromptModel>,
}

impl Api {
    pub fn new(
        store: SharedStore,
        settings: Settings,
        broadcasts: BroadcastManager,
        popups: Arc<RequestPopups>,
        model: Arc<dyn PromptModel>,
    ) -> Self {
        Self {
            store,
            settings,
            broadcasts,
            popups,
            model,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn popups(&self) -> Arc<RequestPopups> {
        self.popups.clone()
    }

    async fn require_host(&self, uid: &str) -> Result<Host> {
        self.store
            .get_host(uid)
            .await?
            .ok_or_else(|| anyhow!("Not a host"))
    }

    fn pay_response(report: PaymentReport) -> Result<PayResponse> {
        // rejected writes are fatal for the caller, not a partial success
        if let Some(denied) = report.permission_denials().next() {
            warn!(
                "Payment {} rejected: {} on {}",
                report.transaction_id, denied.operation, denied.path
            );
            return Err(WriteError::PermissionDenied(denied.clone()).into());
        }
        Ok(PayResponse {
            success: report.success,
            transaction_id: report.transaction_id,
            steps: report
                .steps
                .into_iter()
                .map(|s| PaymentStepResult {
                    step: s.step.as_str().to_string(),
                    error: s.error,
                })
                .collect(),
        })
    }
}

impl HasAuthSecret for Api {
    fn auth_secret(&self) -> &str {
        &self.settings.auth_secret
    }
}

#[async_trait]
impl ZapLiveApi for Api {
    async fn create_session(&self) -> Result<AnonymousSession> {
        let uid = Uuid::new_v4().simple().to_string();
        let token = SessionAuth::issue_token(&self.settings.auth_secret, &uid)?;
        let mut user = User::new(&uid, Utc::now());
        user.coins = self.settings.welcome_coins;
        self.store.upsert_user(&user).await?;
        info!("New anonymous session {}", uid);
        Ok(AnonymousSession { token, uid })
    }

    async fn get_account(&self, auth: SessionAuth) -> Result<AccountInfo> {
        let user = self
            .store
            .get_user(&auth.uid)
            .await?
            .ok_or_else(|| anyhow!("User not found"))?;
        let host = self.store.get_host(&auth.uid).await?;
        Ok(AccountInfo { user, host })
    }

    async fn get_history(&self, auth: SessionAuth, limit: u64) -> Result<Vec<Transaction>> {
        self.store
            .list_user_transactions(&auth.uid, limit.clamp(1, MAX_HISTORY))
            .await
    }

    async fn become_host(&self, auth: SessionAuth, req: BecomeHostRequest) -> Result<Host> {
        become_host(self.store.as_ref(), &auth.uid, &req, Utc::now()).await
    }

    async fn update_host(&self, auth: SessionAuth, req: PatchHost) -> Result<Host> {
        update_stream_settings(self.store.as_ref(), &auth.uid, &req).await
    }

    async fn go_live(&self, auth: SessionAuth) -> Result<LiveStatus> {
        self.broadcasts.go_live(&auth.uid, Utc::now()).await
    }

    async fn heartbeat(&self, auth: SessionAuth) -> Result<LiveStatus> {
        self.broadcasts.heartbeat(&auth.uid, Utc::now()).await
    }

    async fn end_live(&self, auth: SessionAuth) -> Result<()> {
        self.broadcasts.end(&auth.uid).await
    }

    async fn list_live_hosts(&self) -> Result<Vec<HostInfo>> {
        Ok(marketplace(self.store.as_ref())
            .await?
            .iter()
            .map(|h| h.info())
            .collect())
    }

    async fn get_host(&self, id: String) -> Result<HostInfo> {
        resolve_host(self.store.as_ref(), &id)
            .await?
            .map(|h| h.info())
            .ok_or_else(|| anyhow!("Host not found"))
    }

    async fn pay(&self, auth: SessionAuth, req: PayRequest) -> Result<PayResponse> {
        let view = resolve_host(self.store.as_ref(), &req.host_id)
            .await?
            .ok_or_else(|| anyhow!("Host not found"))?;
        let host = view.real()?;
        let amount = match req.kind {
            PaymentType::Zap => ZAP_AMOUNT,
            _ => req
                .amount
                .ok_or_else(|| anyhow!("Amount is required for {}", req.kind))?,
        };
        let user = self
            .store
            .get_user(&auth.uid)
            .await?
            .ok_or_else(|| anyhow!("User not found"))?;
        if user.coins < amount as f64 {
            bail!("Insufficient coins");
        }

        let payment = Payment {
            kind: req.kind,
            amount,
            user_id: auth.uid,
            host_id: host.id.clone(),
            // only the host's own referrer earns from gifts to it
            referrer_id: host.referred_by.clone(),
        };
        let report = process_payment(self.store.as_ref(), &payment, Utc::now()).await?;
        Self::pay_response(report)
    }

    async fn create_request(
        &self,
        auth: SessionAuth,
        req: CreateStreamRequest,
    ) -> Result<StreamRequest> {
        create_request(
            self.store.as_ref(),
            &req.host_id,
            &auth.uid,
            req.user_name,
            req.kind,
            Utc::now(),
        )
        .await
    }

    async fn respond_request(
        &self,
        auth: SessionAuth,
        id: String,
        req: RespondRequest,
    ) -> Result<()> {
        let request = self
            .store
            .get_stream_request(&id)
            .await?
            .ok_or_else(|| anyhow!("Request not found"))?;
        if request.host_id != auth.uid {
            bail!("Not your request");
        }
        self.popups.respond(&auth.uid, &id, req.status).await
    }

    async fn latest_message(&self, auth: SessionAuth) -> Result<LatestMessage> {
        Ok(LatestMessage {
            message: self.store.latest_admin_message(&auth.uid).await?,
        })
    }

    async fn request_payout(&self, auth: SessionAuth) -> Result<PayoutRequest> {
        request_payout(
            self.store.as_ref(),
            &auth.uid,
            self.settings.payouts.min_diamonds,
            Utc::now(),
        )
        .await
    }

    async fn verify_face(&self, auth: SessionAuth, req: ImageRequest) -> Result<FaceVerification> {
        let image = Media::from_data_uri(&req.image)?;
        let r = zap_live_ai::verify_face(self.model.as_ref(), &image).await;
        info!(
            "Face check for {}: verified={} confidence={}",
            auth.uid, r.is_verified, r.confidence
        );
        Ok(r)
    }

    async fn recommend(
        &self,
        _auth: SessionAuth,
        req: RecommendRequest,
    ) -> Result<Vec<Recommendation>> {
        let catalog: Vec<CatalogEntry> = marketplace(self.store.as_ref())
            .await?
            .iter()
            .map(|h| {
                let info = h.info();
                CatalogEntry {
                    id: info.id,
                    name: info.name,
                    tags: info.tags,
                    is_live: info.is_live,
                    rating: info.rating,
                }
            })
            .collect();
        zap_live_ai::recommend_hosts(self.model.as_ref(), &req.preferences, &catalog).await
    }

    async fn optimize_profile(&self, auth: SessionAuth) -> Result<ProfileSuggestions> {
        let host = self.require_host(&auth.uid).await?;
        let profile = HostProfile {
            tags: host.tag_list(),
            name: host.name,
            bio: host.bio,
            stream_type: host.stream_type.to_string(),
        };
        zap_live_ai::optimize_profile(self.model.as_ref(), &profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_settings;
    use zap_live_ai::MockModel;
    use zap_live_db::{LiveStore, MemoryStore, RequestKind, RequestStatus};

    fn api(store: &MemoryStore, model: MockModel) -> Api {
        let shared: SharedStore = Arc::new(store.clone());
        Api::new(
            shared.clone(),
            test_settings(),
            BroadcastManager::new(shared.clone()),
            Arc::new(RequestPopups::new(shared)),
            Arc::new(model),
        )
    }

    async fn viewer_and_host(api: &Api) -> Result<(SessionAuth, SessionAuth)> {
        let viewer = api.create_session().await?;
        let host = api.create_session().await?;
        let host_auth = SessionAuth { uid: host.uid };
        api.become_host(
            host_auth.clone(),
            BecomeHostRequest {
                name: "Host".to_string(),
                ..Default::default()
            },
        )
        .await?;
        Ok((SessionAuth { uid: viewer.uid }, host_auth))
    }

    #[tokio::test]
    async fn test_session_token_verifies() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let s = api.create_session().await?;
        let auth = SessionAuth::try_from_token(api.auth_secret(), &s.token)?;
        assert_eq!(auth.uid, s.uid);
        let account = api.get_account(auth).await?;
        assert_eq!(account.user.coins, 500.0);
        assert!(account.host.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_zap_uses_fixed_amount() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, host) = viewer_and_host(&api).await?;

        let r = api
            .pay(
                viewer.clone(),
                PayRequest {
                    kind: PaymentType::Zap,
                    host_id: host.uid.clone(),
                    amount: Some(400),
                },
            )
            .await?;
        assert!(r.success);
        assert_eq!(
            store.get_user(&viewer.uid).await?.unwrap().coins,
            500.0 - ZAP_AMOUNT as f64
        );
        assert_eq!(
            store.get_host(&host.uid).await?.unwrap().earnings,
            ZAP_AMOUNT as f64
        );
        assert_eq!(api.get_history(viewer, 50).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_referral_goes_to_hosts_referrer() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, referrer) = viewer_and_host(&api).await?;
        let accomplice = api.create_session().await?;

        let host = SessionAuth {
            uid: api.create_session().await?.uid,
        };
        api.become_host(
            host.clone(),
            BecomeHostRequest {
                name: "Referred".to_string(),
                referral_code: Some(referrer.uid.clone()),
                ..Default::default()
            },
        )
        .await?;

        // a client supplied referrer is not part of the request and is ignored
        let req: PayRequest = serde_json::from_value(serde_json::json!({
            "type": "tip",
            "hostId": host.uid,
            "amount": 400,
            "referrerId": accomplice.uid,
        }))?;
        let r = api.pay(viewer, req).await?;
        assert!(r.success);
        let referrer_user = store.get_user(&referrer.uid).await?.unwrap();
        assert_eq!(referrer_user.coins, 504.0);
        assert_eq!(referrer_user.referral_earnings, 4.0);
        let accomplice_user = store.get_user(&accomplice.uid).await?.unwrap();
        assert_eq!(accomplice_user.coins, 500.0);
        assert_eq!(accomplice_user.referral_earnings, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreferred_host_pays_no_referral() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, host) = viewer_and_host(&api).await?;

        let r = api
            .pay(
                viewer,
                PayRequest {
                    kind: PaymentType::Tip,
                    host_id: host.uid.clone(),
                    amount: Some(400),
                },
            )
            .await?;
        assert!(r.success);
        assert!(r.steps.iter().all(|s| s.error.is_none()));
        assert_eq!(store.get_host(&host.uid).await?.unwrap().earnings, 400.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_pay_rejects_simulated_and_broke() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, host) = viewer_and_host(&api).await?;

        let sim = api
            .pay(
                viewer.clone(),
                PayRequest {
                    kind: PaymentType::Zap,
                    host_id: "sim-aanya".to_string(),
                    amount: None,
                },
            )
            .await;
        assert!(sim.is_err());

        let broke = api
            .pay(
                viewer.clone(),
                PayRequest {
                    kind: PaymentType::Tip,
                    host_id: host.uid.clone(),
                    amount: Some(501),
                },
            )
            .await;
        assert!(broke.is_err());
        assert!(store.list_user_transactions(&viewer.uid, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_pay_escalates_permission_denial() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, host) = viewer_and_host(&api).await?;
        store.deny_writes("hosts/");

        let err = api
            .pay(
                viewer,
                PayRequest {
                    kind: PaymentType::Tip,
                    host_id: host.uid.clone(),
                    amount: Some(50),
                },
            )
            .await
            .unwrap_err();
        let denied = err.downcast_ref::<WriteError>().unwrap();
        assert_eq!(
            denied.permission().unwrap().path,
            format!("hosts/{}", host.uid)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_only_host_can_respond() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, host) = viewer_and_host(&api).await?;

        let req = api
            .create_request(
                viewer.clone(),
                CreateStreamRequest {
                    host_id: host.uid.clone(),
                    kind: RequestKind::PrivateCall,
                    user_name: Some("viewer".to_string()),
                },
            )
            .await?;
        let respond = RespondRequest {
            status: RequestStatus::Approved,
        };
        assert!(
            api.respond_request(viewer, req.id.clone(), respond.clone())
                .await
                .is_err()
        );
        api.respond_request(host, req.id.clone(), respond).await?;
        assert_eq!(
            store.get_stream_request(&req.id).await?.unwrap().status,
            RequestStatus::Approved
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_face_fails_open() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(&store, MockModel::failing());
        let (viewer, _) = viewer_and_host(&api).await?;
        let r = api
            .verify_face(
                viewer.clone(),
                ImageRequest {
                    image: "data:image/jpeg;base64,c2VsZmll".to_string(),
                },
            )
            .await?;
        assert_eq!(r, FaceVerification::fail_open());

        // malformed input is the callers fault, not an outage
        assert!(
            api.verify_face(
                viewer,
                ImageRequest {
                    image: "not an image".to_string(),
                },
            )
            .await
            .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_recommend_from_marketplace() -> Result<()> {
        let store = MemoryStore::new();
        let api = api(
            &store,
            MockModel::answering(serde_json::json!({
                "recommendations": [
                    { "hostId": "sim-kabir", "reason": "food" },
                    { "hostId": "made-up", "reason": "nope" }
                ]
            })),
        );
        let (viewer, _) = viewer_and_host(&api).await?;
        let r = api
            .recommend(
                viewer,
                RecommendRequest {
                    preferences: "street food".to_string(),
                },
            )
            .await?;
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].host_id, "sim-kabir");
        Ok(())
    }
}
