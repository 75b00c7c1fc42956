use crate::admin_api::ZapLiveAdminApiImpl;
use crate::api::Api;
use crate::settings::Settings;
use crate::shell_cache::ShellCache;
use axum::Router;
use std::sync::Arc;
use tokio::sync::RwLock;
use zap_live_api_common::{AxumAdminApi, AxumApi};

mod feeds;
pub use feeds::*;
mod handoff;
pub use handoff::*;
mod popup;
pub use popup::*;
mod shell;
pub use shell::*;

/// Everything served over http, the shell router handles all unmatched paths
pub fn build_router(
    api: Api,
    admin_api: ZapLiveAdminApiImpl,
    settings: &Settings,
    cache: Arc<RwLock<ShellCache>>,
) -> Router {
    Router::new()
        .merge(AxumApi::new(api.clone()))
        .merge(AxumAdminApi::new(admin_api))
        .merge(PopupRouter::new(
            api.popups(),
            settings.auth_secret.clone(),
        ))
        .merge(LiveFeedRouter::new(
            api.store(),
            settings.auth_secret.clone(),
            settings.admins.clone(),
        ))
        .merge(HandoffRouter::new(
            api.store(),
            settings.handoff.clone(),
            settings.public_url.clone(),
        ))
        .merge(ShellRouter::new(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastManager;
    use crate::requests::RequestPopups;
    use crate::shell_cache::render_shell;
    use crate::tests::test_settings;
    use anyhow::Result;
    use axum::body::{Body, BodyDataStream};
    use axum::http::{HeaderValue, Request, StatusCode, header};
    use futures_util::StreamExt;
    use tower::ServiceExt;
    use zap_live_ai::MockModel;
    use zap_live_api_common::SessionAuth;
    use zap_live_db::{
        AdminMessage, AdminMessageKind, Host, LiveStore, MemoryStore, PaymentDetails, PayoutRequest,
        PayoutStatus, SharedStore,
    };

    fn app(store: &MemoryStore) -> Result<Router> {
        let settings = test_settings();
        let shared: SharedStore = Arc::new(store.clone());
        let broadcasts = BroadcastManager::new(shared.clone());
        let popups = Arc::new(RequestPopups::new(shared.clone()));
        let api = Api::new(
            shared.clone(),
            settings.clone(),
            broadcasts.clone(),
            popups,
            Arc::new(MockModel::failing()),
        );
        let admin = ZapLiveAdminApiImpl::new(
            shared,
            settings.auth_secret.clone(),
            settings.admins.clone(),
            broadcasts,
            Arc::new(MockModel::failing()),
        );
        let mut cache = ShellCache::new(settings.shell_cache.routes.clone());
        cache.install(&settings.shell_cache.version, |route| {
            render_shell(route, &settings.shell_cache.version, &settings.public_url)
        })?;
        Ok(build_router(
            api,
            admin,
            &settings,
            Arc::new(RwLock::new(cache)),
        ))
    }

    async fn read_json(response: axum::response::Response) -> Result<serde_json::Value> {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn read_text(response: axum::response::Response) -> Result<String> {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(body.to_vec())?)
    }

    async fn next_matching(frames: &mut BodyDataStream, needle: &str) -> Result<String> {
        while let Some(chunk) = frames.next().await {
            let frame = String::from_utf8(chunk?.to_vec())?;
            if frame.contains(needle) {
                return Ok(frame);
            }
        }
        anyhow::bail!("Event stream closed before {}", needle)
    }

    /// Read server sent event frames until one contains [needle]
    async fn wait_event(response: axum::response::Response, needle: &str) -> Result<String> {
        let mut frames = response.into_body().into_data_stream();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            next_matching(&mut frames, needle),
        )
        .await?
    }

    fn bearer(uid: &str) -> String {
        format!(
            "Bearer {}",
            SessionAuth::issue_token(&test_settings().auth_secret, uid).unwrap()
        )
    }

    #[tokio::test]
    async fn test_anonymous_session_and_account() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/anonymous")
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let session = read_json(response).await?;
        let token = session["token"].as_str().unwrap_or_default().to_string();

        let req = Request::builder()
            .uri("/api/v1/account")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let account = read_json(response).await?;
        assert_eq!(account["user"]["id"], session["uid"]);

        let req = Request::builder()
            .uri("/api/v1/account")
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/account")
            .header(
                header::AUTHORIZATION,
                HeaderValue::from_bytes(b"Bearer \xff\xfe")?,
            )
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_denied_payment_is_fatal() -> Result<()> {
        let store = MemoryStore::new();
        let mut user = zap_live_db::User::new("u1", chrono::Utc::now());
        user.coins = 100.0;
        store.upsert_user(&user).await?;
        store
            .upsert_host(&Host::new("h1", "Host", chrono::Utc::now()))
            .await?;
        store.deny_writes("users/");
        let app = app(&store)?;

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/pay")
            .header(header::AUTHORIZATION, bearer("u1"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"type":"tip","hostId":"h1","amount":20}"#))?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_json(response).await?;
        assert_eq!(body["fatal"], true);
        assert_eq!(body["permission"]["path"], "users/u1");
        Ok(())
    }

    #[tokio::test]
    async fn test_simulated_hosts_when_nobody_live() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;
        let req = Request::builder()
            .uri("/api/v1/hosts/live")
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let hosts = read_json(response).await?;
        let hosts = hosts.as_array().cloned().unwrap_or_default();
        assert!(!hosts.is_empty());
        assert!(hosts.iter().all(|h| h["simulated"] == true));
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;
        let req = Request::builder()
            .uri("/api/v1/admin/payouts")
            .header(header::AUTHORIZATION, bearer("viewer"))
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_json(response).await?;
        assert_eq!(body["fatal"], false);
        assert!(body.get("permission").is_none());

        let req = Request::builder()
            .uri("/api/v1/admin/payouts?status=pending")
            .header(header::AUTHORIZATION, bearer("admin"))
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_handoff_page() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;
        let req = Request::builder()
            .uri("/live/sim-aanya")
            .header(
                header::USER_AGENT,
                "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36",
            )
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let html = read_text(response).await?;
        assert!(html.contains("zaplive://live/sim-aanya"));
        assert_eq!(html.matches("setTimeout(").count(), 1);

        let req = Request::builder()
            .uri("/live/sim-aanya")
            .header(
                header::USER_AGENT,
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0 Safari/537.36",
            )
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let html = read_text(response).await?;
        assert!(!html.contains("zaplive://"));
        assert!(!html.contains("setTimeout("));
        assert!(html.contains("?host=sim-aanya"));

        let req = Request::builder()
            .uri("/live/nobody")
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_shell_served_from_cache() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;

        let req = Request::builder().uri("/explore").body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(read_text(response).await?.contains("zap-live-v1"));

        let req = Request::builder().uri("/missing.js").body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method("POST")
            .uri("/sw/skip-waiting")
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let status = read_json(response).await?;
        assert_eq!(status["active"], "zap-live-v1");
        Ok(())
    }

    #[tokio::test]
    async fn test_live_hosts_feed() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;
        let req = Request::builder()
            .uri("/api/v1/live/hosts")
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|h| h.to_str().ok()),
            Some("text/event-stream")
        );

        let mut host = Host::new("h1", "Real Host", chrono::Utc::now());
        host.is_live = true;
        store.upsert_host(&host).await?;
        let frame = wait_event(response, "Real Host").await?;
        assert!(frame.starts_with("event: hosts"));
        assert!(!frame.contains("sim-aanya"));
        Ok(())
    }

    #[tokio::test]
    async fn test_host_message_feed() -> Result<()> {
        let store = MemoryStore::new();
        let app = app(&store)?;
        let req = Request::builder()
            .uri("/api/v1/live/messages")
            .header(header::AUTHORIZATION, bearer("h1"))
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);

        store
            .send_admin_message(&AdminMessage {
                id: "m1".to_string(),
                host_id: "h1".to_string(),
                content: "Please turn on the lights".to_string(),
                sender: "admin".to_string(),
                kind: AdminMessageKind::Directive,
                timestamp: chrono::Utc::now(),
            })
            .await?;
        let frame = wait_event(response, "Please turn on the lights").await?;
        assert!(frame.starts_with("event: message"));

        let req = Request::builder()
            .uri("/api/v1/live/messages")
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_payouts_feed() -> Result<()> {
        let store = MemoryStore::new();
        store
            .create_payout(&PayoutRequest {
                id: "p1".to_string(),
                host_id: "h1".to_string(),
                host_name: "Host".to_string(),
                amount_diamonds: 1000.0,
                amount_cash: 20.0,
                status: PayoutStatus::Pending,
                payment_details: PaymentDetails {
                    upi_id: Some("host@upi".to_string()),
                },
                requested_at: chrono::Utc::now(),
                paid_at: None,
            })
            .await?;
        let app = app(&store)?;

        let req = Request::builder()
            .uri("/api/v1/admin/live/payouts")
            .header(header::AUTHORIZATION, bearer("viewer"))
            .body(Body::empty())?;
        let response = app.clone().oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let req = Request::builder()
            .uri("/api/v1/admin/live/payouts")
            .header(header::AUTHORIZATION, bearer("admin"))
            .body(Body::empty())?;
        let response = app.oneshot(req).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let frame = wait_event(response, "\"p1\"").await?;
        assert!(frame.starts_with("event: payouts"));
        assert!(frame.contains("host@upi"));
        Ok(())
    }
}
