use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use zap_live_ai::{ErrorReport, Media, ModerationVerdict, PromptModel, Visibility};
use zap_live_db::{AdminMessage, AdminMessageKind, Host, HostPatch, LiveStore, StreamType};

const BAN_NOTICE: &str =
    "Your account has been suspended for violating the community guidelines.";

async fn require_host(store: &dyn LiveStore, host_id: &str) -> Result<Host> {
    store
        .get_host(host_id)
        .await?
        .ok_or_else(|| anyhow!("Host not found"))
}

async fn push_message(
    store: &dyn LiveStore,
    host_id: &str,
    sender: &str,
    content: &str,
    kind: AdminMessageKind,
    now: DateTime<Utc>,
) -> Result<AdminMessage> {
    let msg = AdminMessage {
        id: Uuid::new_v4().to_string(),
        host_id: host_id.to_string(),
        content: content.to_string(),
        sender: sender.to_string(),
        kind,
        timestamp: now,
    };
    store.send_admin_message(&msg).await?;
    Ok(msg)
}

/// Ban a host, taking them offline and notifying them
pub async fn ban_host(
    store: &dyn LiveStore,
    host_id: &str,
    admin: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    require_host(store, host_id).await?;
    store
        .update_host(
            host_id,
            &HostPatch {
                is_banned: Some(true),
                is_live: Some(false),
                ..Default::default()
            },
        )
        .await?;
    push_message(
        store,
        host_id,
        admin,
        BAN_NOTICE,
        AdminMessageKind::BanNotice,
        now,
    )
    .await?;
    info!("Host {} banned by {}", host_id, admin);
    Ok(())
}

pub async fn unban_host(store: &dyn LiveStore, host_id: &str, admin: &str) -> Result<()> {
    require_host(store, host_id).await?;
    store
        .update_host(
            host_id,
            &HostPatch {
                is_banned: Some(false),
                ..Default::default()
            },
        )
        .await?;
    info!("Host {} unbanned by {}", host_id, admin);
    Ok(())
}

pub async fn verify_host(store: &dyn LiveStore, host_id: &str, verified: bool) -> Result<()> {
    require_host(store, host_id).await?;
    store
        .update_host(
            host_id,
            &HostPatch {
                verified: Some(verified),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

pub async fn send_directive(
    store: &dyn LiveStore,
    host_id: &str,
    sender: &str,
    content: &str,
    now: DateTime<Utc>,
) -> Result<AdminMessage> {
    let content = content.trim();
    if content.is_empty() {
        bail!("Message is empty");
    }
    require_host(store, host_id).await?;
    push_message(
        store,
        host_id,
        sender,
        content,
        AdminMessageKind::Directive,
        now,
    )
    .await
}

pub fn visibility(stream_type: StreamType) -> Visibility {
    match stream_type {
        StreamType::Public => Visibility::Public,
        StreamType::Private | StreamType::InviteOnly => Visibility::Private,
    }
}

#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    pub verdict: ModerationVerdict,
    /// Blur was enforced and a directive sent
    pub actioned: bool,
}

/// Classify a frame of a hosts stream, unsafe frames force the stream blurred.
///
/// Moderation errors are returned, a frame is never assumed safe.
pub async fn moderate_frame(
    store: &dyn LiveStore,
    model: &dyn PromptModel,
    host_id: &str,
    image: &Media,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<ModerationOutcome> {
    let host = require_host(store, host_id).await?;
    let verdict =
        zap_live_ai::moderate_stream(model, image, visibility(host.stream_type)).await?;
    if verdict.is_safe {
        return Ok(ModerationOutcome {
            verdict,
            actioned: false,
        });
    }

    warn!(
        "Unsafe frame from {}: {:?} {}",
        host_id, verdict.verdict, verdict.reason
    );
    store
        .update_host(
            host_id,
            &HostPatch {
                manual_blur: Some(true),
                ..Default::default()
            },
        )
        .await?;
    push_message(
        store,
        host_id,
        sender,
        &format!(
            "Your stream has been blurred: {}. Please adjust your content.",
            verdict.reason
        ),
        AdminMessageKind::Directive,
        now,
    )
    .await?;
    Ok(ModerationOutcome {
        verdict,
        actioned: true,
    })
}

/// Summarise reported issues for the admin console
pub async fn error_report(
    model: &dyn PromptModel,
    logs: &str,
    issues: &[String],
) -> Result<Vec<ErrorReport>> {
    let reports = zap_live_ai::error_report(model, logs, issues).await?;
    info!(
        "Error report: {} issues summarised into {} reports",
        issues.len(),
        reports.len()
    );
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zap_live_ai::MockModel;
    use zap_live_db::MemoryStore;

    async fn setup() -> Result<MemoryStore> {
        let store = MemoryStore::new();
        let mut h = Host::new("h1", "Host", Utc::now());
        h.is_live = true;
        store.upsert_host(&h).await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_ban_takes_host_offline() -> Result<()> {
        let store = setup().await?;
        ban_host(&store, "h1", "admin", Utc::now()).await?;
        let h = store.get_host("h1").await?.unwrap();
        assert!(h.is_banned);
        assert!(!h.is_live);
        let msg = store.latest_admin_message("h1").await?.unwrap();
        assert_eq!(msg.kind, AdminMessageKind::BanNotice);

        unban_host(&store, "h1", "admin").await?;
        assert!(!store.get_host("h1").await?.unwrap().is_banned);
        assert!(ban_host(&store, "nobody", "admin", Utc::now()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_unsafe_frame_blurs_stream() -> Result<()> {
        let store = setup().await?;
        let model = MockModel::answering(serde_json::json!({
            "isSafe": false,
            "reason": "nudity",
            "verdict": "block"
        }));
        let image = Media::from_bytes("image/jpeg", b"frame");
        let out = moderate_frame(&store, &model, "h1", &image, "moderator", Utc::now()).await?;
        assert!(out.actioned);
        assert!(store.get_host("h1").await?.unwrap().manual_blur);
        let msg = store.latest_admin_message("h1").await?.unwrap();
        assert_eq!(msg.kind, AdminMessageKind::Directive);
        assert!(msg.content.contains("nudity"));
        Ok(())
    }

    #[tokio::test]
    async fn test_safe_frame_untouched() -> Result<()> {
        let store = setup().await?;
        let model = MockModel::answering(serde_json::json!({
            "isSafe": true,
            "reason": "",
            "verdict": "safe"
        }));
        let image = Media::from_bytes("image/jpeg", b"frame");
        let out = moderate_frame(&store, &model, "h1", &image, "moderator", Utc::now()).await?;
        assert!(!out.actioned);
        assert!(!store.get_host("h1").await?.unwrap().manual_blur);
        assert!(store.latest_admin_message("h1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_moderation_outage_is_an_error() -> Result<()> {
        let store = setup().await?;
        let image = Media::from_bytes("image/jpeg", b"frame");
        let r = moderate_frame(
            &store,
            &MockModel::failing(),
            "h1",
            &image,
            "moderator",
            Utc::now(),
        )
        .await;
        assert!(r.is_err());
        assert!(!store.get_host("h1").await?.unwrap().manual_blur);
        Ok(())
    }

    #[test]
    fn test_visibility() {
        assert_eq!(visibility(StreamType::Public), Visibility::Public);
        assert_eq!(visibility(StreamType::InviteOnly), Visibility::Private);
    }
}
