use crate::{
    AccountInfo, AnonymousSession, BecomeHostRequest, CreateStreamRequest, HasAuthSecret,
    HostInfo, ImageRequest, LatestMessage, LiveStatus, PatchHost, PayRequest, PayResponse,
    RecommendRequest, RespondRequest, SessionAuth,
};
use anyhow::Result;
use async_trait::async_trait;
use zap_live_ai::{FaceVerification, ProfileSuggestions, Recommendation};
use zap_live_db::{Host, PayoutRequest, StreamRequest, Transaction};

#[async_trait]
pub trait ZapLiveApi: HasAuthSecret + Clone + Send + Sync {
    async fn create_session(&self) -> Result<AnonymousSession>;
    async fn get_account(&self, auth: SessionAuth) -> Result<AccountInfo>;
    async fn get_history(&self, auth: SessionAuth, limit: u64) -> Result<Vec<Transaction>>;

    async fn become_host(&self, auth: SessionAuth, req: BecomeHostRequest) -> Result<Host>;
    async fn update_host(&self, auth: SessionAuth, req: PatchHost) -> Result<Host>;
    async fn go_live(&self, auth: SessionAuth) -> Result<LiveStatus>;
    async fn heartbeat(&self, auth: SessionAuth) -> Result<LiveStatus>;
    async fn end_live(&self, auth: SessionAuth) -> Result<()>;
    async fn list_live_hosts(&self) -> Result<Vec<HostInfo>>;
    async fn get_host(&self, id: String) -> Result<HostInfo>;

    async fn pay(&self, auth: SessionAuth, req: PayRequest) -> Result<PayResponse>;

    async fn create_request(
        &self,
        auth: SessionAuth,
        req: CreateStreamRequest,
    ) -> Result<StreamRequest>;
    async fn respond_request(&self, auth: SessionAuth, id: String, req: RespondRequest)
    -> Result<()>;

    async fn latest_message(&self, auth: SessionAuth) -> Result<LatestMessage>;
    async fn request_payout(&self, auth: SessionAuth) -> Result<PayoutRequest>;

    async fn verify_face(&self, auth: SessionAuth, req: ImageRequest) -> Result<FaceVerification>;
    async fn recommend(
        &self,
        auth: SessionAuth,
        req: RecommendRequest,
    ) -> Result<Vec<Recommendation>>;
    async fn optimize_profile(&self, auth: SessionAuth) -> Result<ProfileSuggestions>;
}
