use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zap_live_db::{
    AdminMessage, Host, PaymentType, RequestKind, RequestStatus, StreamType, User, WriteError,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnonymousSession {
    pub uid: String,
    /// Bearer token for the `Authorization` header
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountInfo {
    pub user: User,
    /// Host profile when this user became a host
    pub host: Option<Host>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BecomeHostRequest {
    pub name: String,
    pub bio: Option<String>,
    /// Data uri or url of the avatar image
    pub avatar: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Host id of the host who referred this user
    pub referral_code: Option<String>,
    pub upi_id: Option<String>,
}

/// Host editable stream settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchHost {
    pub stream_type: Option<StreamType>,
    pub manual_blur: Option<bool>,
    pub bio: Option<String>,
    pub tags: Option<Vec<String>>,
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub host_id: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Public host profile, either a real host or a simulated placeholder
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub tags: Vec<String>,
    pub is_live: bool,
    pub verified: bool,
    pub stream_type: StreamType,
    pub manual_blur: bool,
    pub rating: f64,
    pub simulated: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    #[serde(rename = "type")]
    pub kind: PaymentType,
    pub host_id: String,
    /// Required except for zaps which have a fixed amount
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentStepResult {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WriteError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayResponse {
    /// True only when every side effect of the payment was applied
    pub success: bool,
    pub transaction_id: String,
    pub steps: Vec<PaymentStepResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamRequest {
    pub host_id: String,
    pub kind: RequestKind,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondRequest {
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageRequest {
    /// `data:<mime>;base64,<payload>`
    pub image: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecommendRequest {
    pub preferences: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessage {
    pub message: Option<AdminMessage>,
}
