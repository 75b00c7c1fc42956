use crate::requests::{PopupState, RequestPopup, RequestPopups};
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;
use zap_live_api_common::{HasAuthSecret, SessionAuth};

/// Pushes the private-call popup state of the signed in host as server sent events
#[derive(Clone)]
pub struct PopupRouter {
    popups: Arc<RequestPopups>,
    auth_secret: String,
}

impl HasAuthSecret for PopupRouter {
    fn auth_secret(&self) -> &str {
        &self.auth_secret
    }
}

impl PopupRouter {
    pub fn new(popups: Arc<RequestPopups>, auth_secret: String) -> Router {
        let me = PopupRouter {
            popups,
            auth_secret,
        };

        Router::new()
            .route("/api/v1/requests/popup", get(Self::popup_route))
            .with_state(me)
    }

    async fn popup_route(
        auth: SessionAuth,
        State(this): State<PopupRouter>,
    ) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
        let popup = this.popups.get_or_spawn(&auth.uid);
        let stream = WatchStream::new(popup.watch()).map(move |s| Self::event(&popup, &s));
        Sse::new(stream).keep_alive(KeepAlive::default())
    }

    /// The stream holds [popup], it stays open while the host is connected
    fn event(popup: &Arc<RequestPopup>, state: &PopupState) -> Result<Event, axum::Error> {
        debug!("Popup {} {:?}", popup.host_id(), state);
        Event::default().event("popup").json_data(state)
    }
}
