use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity id from the anonymous auth session
    pub id: String,
    /// Spendable coin balance
    pub coins: f64,
    /// Total coins earned through referral commission
    pub referral_earnings: f64,
    /// Timestamp when this user first used the service
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            coins: 0.0,
            referral_earnings: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum StreamType {
    #[default]
    Public = 0,
    Private = 1,
    InviteOnly = 2,
}

impl Display for StreamType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Public => write!(f, "public"),
            StreamType::Private => write!(f, "private"),
            StreamType::InviteOnly => write!(f, "invite-only"),
        }
    }
}

impl FromStr for StreamType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(StreamType::Public),
            "private" => Ok(StreamType::Private),
            "invite-only" => Ok(StreamType::InviteOnly),
            _ => bail!("Unknown stream type: {}", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    /// UPI id where payouts are sent
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Same id as the [User] which became a host
    pub id: String,
    pub name: String,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    /// Tags (comma separated)
    pub tags: Option<String>,
    /// Accumulated diamonds
    pub earnings: f64,
    pub is_live: bool,
    pub is_banned: bool,
    pub verified: bool,
    pub stream_type: StreamType,
    /// Admin/moderation enforced blur of the stream
    pub manual_blur: bool,
    pub rating: f64,
    pub referral_count: u32,
    /// Host id of the referrer
    pub referred_by: Option<String>,
    #[sqlx(flatten)]
    pub payment_details: PaymentDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn new(id: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            bio: None,
            avatar: None,
            tags: None,
            earnings: 0.0,
            is_live: false,
            is_banned: false,
            verified: false,
            stream_type: StreamType::Public,
            manual_blur: false,
            rating: 0.0,
            referral_count: 0,
            referred_by: None,
            payment_details: PaymentDetails::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_ref()
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-field partial update of a [Host], unset fields are left untouched
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<StreamType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_blur: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl HostPatch {
    pub fn is_empty(&self) -> bool {
        *self == HostPatch::default()
    }

    /// Apply this patch onto an existing document
    pub fn apply(&self, host: &mut Host, now: DateTime<Utc>) {
        if let Some(v) = self.is_live {
            host.is_live = v;
        }
        if let Some(v) = self.is_banned {
            host.is_banned = v;
        }
        if let Some(v) = self.verified {
            host.verified = v;
        }
        if let Some(v) = self.stream_type {
            host.stream_type = v;
        }
        if let Some(v) = self.manual_blur {
            host.manual_blur = v;
        }
        if let Some(v) = &self.upi_id {
            host.payment_details.upi_id = Some(v.clone());
        }
        if let Some(v) = &self.bio {
            host.bio = Some(v.clone());
        }
        if let Some(v) = &self.tags {
            host.tags = Some(v.clone());
        }
        host.updated_at = now;
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RequestKind {
    #[default]
    Zap = 0,
    PrivateCall = 1,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RequestStatus {
    #[default]
    Pending = 0,
    Approved = 1,
    Rejected = 2,
}

impl Display for RequestStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub id: String,
    pub host_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionStatus {
    #[default]
    Active = 0,
    Expired = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StreamSession {
    /// `{user_id}_{host_id}`
    pub id: String,
    pub user_id: String,
    pub host_id: String,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub updated_at: DateTime<Utc>,
}

impl StreamSession {
    pub fn session_id(user_id: &str, host_id: &str) -> String {
        format!("{}_{}", user_id, host_id)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at > now
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PaymentType {
    #[default]
    Zap = 0,
    Tip = 1,
    Referral = 2,
    PrivateSession = 3,
}

impl Display for PaymentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentType::Zap => write!(f, "zap"),
            PaymentType::Tip => write!(f, "tip"),
            PaymentType::Referral => write!(f, "referral"),
            PaymentType::PrivateSession => write!(f, "private_session"),
        }
    }
}

impl FromStr for PaymentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zap" => Ok(PaymentType::Zap),
            "tip" => Ok(PaymentType::Tip),
            "referral" => Ok(PaymentType::Referral),
            "private_session" => Ok(PaymentType::PrivateSession),
            _ => bail!("Unknown payment type: {}", s),
        }
    }
}

/// Append-only payment log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: String,
    #[sqlx(rename = "from_id")]
    pub from: String,
    #[sqlx(rename = "to_id")]
    pub to: String,
    pub amount: f64,
    #[serde(rename = "type")]
    #[sqlx(rename = "payment_type")]
    pub payment_type: PaymentType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PayoutStatus {
    #[default]
    Pending = 0,
    Paid = 1,
}

impl FromStr for PayoutStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "paid" => Ok(PayoutStatus::Paid),
            _ => bail!("Unknown payout status: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub id: String,
    pub host_id: String,
    pub host_name: String,
    pub amount_diamonds: f64,
    /// Cash value in INR at the time of the request
    pub amount_cash: f64,
    pub status: PayoutStatus,
    #[sqlx(flatten)]
    pub payment_details: PaymentDetails,
    pub requested_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AdminMessageKind {
    #[default]
    Directive = 0,
    BanNotice = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub id: String,
    pub host_id: String,
    pub content: String,
    pub sender: String,
    pub kind: AdminMessageKind,
    pub timestamp: DateTime<Utc>,
}
