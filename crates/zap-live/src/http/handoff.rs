use crate::handoff::{HandoffAction, HandoffLinks, Platform, render_page};
use crate::hosts::resolve_host;
use crate::settings::HandoffSettings;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Html;
use axum::routing::get;
use zap_live_db::SharedStore;

/// Router which serves the app-handoff page for shared host links
#[derive(Clone)]
pub struct HandoffRouter {
    store: SharedStore,
    settings: HandoffSettings,
    public_url: String,
}

impl HandoffRouter {
    pub fn new(store: SharedStore, settings: HandoffSettings, public_url: String) -> Router {
        let me = HandoffRouter {
            store,
            settings,
            public_url,
        };

        Router::new()
            .route("/live/{host_id}", get(Self::handoff_route))
            .with_state(me)
    }

    async fn handoff_route(
        State(me): State<HandoffRouter>,
        Path(host_id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Html<String>, (StatusCode, String)> {
        let host = resolve_host(me.store.as_ref(), &host_id)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
            .ok_or((StatusCode::NOT_FOUND, "Host not found".to_string()))?;

        let ua = headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        let platform = Platform::from_user_agent(ua);
        let links = HandoffLinks::new(&me.settings, &me.public_url, host.id());
        let action = HandoffAction::plan(platform, &links);
        let page = render_page(&action, host.id(), &host.info().name)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        Ok(Html(page))
    }
}
