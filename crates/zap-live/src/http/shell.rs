use crate::shell_cache::{CachePolicy, ShellCache, ShellCacheStatus};
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Serves cached route shells for every path no other router handles
#[derive(Clone)]
pub struct ShellRouter {
    cache: Arc<RwLock<ShellCache>>,
}

impl ShellRouter {
    pub fn new(cache: Arc<RwLock<ShellCache>>) -> Router {
        let me = ShellRouter { cache };

        Router::new()
            .route(
                "/sw/status",
                get(async |State(this): State<ShellRouter>| {
                    Json(this.cache.read().await.status())
                }),
            )
            .route("/sw/skip-waiting", post(Self::skip_waiting))
            .fallback(Self::serve_shell)
            .with_state(me)
    }

    async fn skip_waiting(State(this): State<ShellRouter>) -> Json<ShellCacheStatus> {
        let mut cache = this.cache.write().await;
        if let Some(v) = cache.skip_waiting() {
            debug!("Skip waiting activated {}", v);
        }
        Json(cache.status())
    }

    async fn serve_shell(State(this): State<ShellRouter>, method: Method, uri: Uri) -> Response {
        let cache = this.cache.read().await;
        let url = uri.to_string();
        match cache.classify(method.as_str(), &url) {
            CachePolicy::Shell => match cache.lookup(&url) {
                Some(body) => (
                    [(header::CACHE_CONTROL, "no-cache")],
                    Html(body.to_string()),
                )
                    .into_response(),
                None => (StatusCode::SERVICE_UNAVAILABLE, "Shell not cached").into_response(),
            },
            CachePolicy::Bypass | CachePolicy::Network => {
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
        }
    }
}
