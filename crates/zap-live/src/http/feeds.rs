use crate::hosts::{HostView, marketplace_from};
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use zap_live_api_common::{AccessDenied, ApiError, HasAuthSecret, HostInfo, SessionAuth};
use zap_live_db::{
    HostTransactions, LatestAdminMessage, LiveHosts, PendingPayouts, SharedStore, Subscription,
    SubscriptionRegistry,
};

/// Transactions pushed on the host earnings feed
pub const FEED_TRANSACTIONS: u64 = 20;

/// Live query results pushed as server sent events, one event per re-evaluation
#[derive(Clone)]
pub struct LiveFeedRouter {
    hosts: Arc<SubscriptionRegistry<LiveHosts>>,
    payouts: Arc<SubscriptionRegistry<PendingPayouts>>,
    messages: Arc<SubscriptionRegistry<LatestAdminMessage>>,
    transactions: Arc<SubscriptionRegistry<HostTransactions>>,
    auth_secret: String,
    admins: Vec<String>,
}

impl HasAuthSecret for LiveFeedRouter {
    fn auth_secret(&self) -> &str {
        &self.auth_secret
    }
}

impl LiveFeedRouter {
    pub fn new(store: SharedStore, auth_secret: String, admins: Vec<String>) -> Router {
        let me = LiveFeedRouter {
            hosts: Arc::new(SubscriptionRegistry::new(store.clone())),
            payouts: Arc::new(SubscriptionRegistry::new(store.clone())),
            messages: Arc::new(SubscriptionRegistry::new(store.clone())),
            transactions: Arc::new(SubscriptionRegistry::new(store)),
            auth_secret,
            admins,
        };

        Router::new()
            .route(
                "/api/v1/live/hosts",
                get(async |State(this): State<LiveFeedRouter>| {
                    Self::feed(this.hosts.subscribe(LiveHosts), "hosts", |docs| {
                        marketplace_from(docs)
                            .iter()
                            .map(HostView::info)
                            .collect::<Vec<HostInfo>>()
                    })
                }),
            )
            .route(
                "/api/v1/live/messages",
                get(async |auth: SessionAuth, State(this): State<LiveFeedRouter>| {
                    let q = LatestAdminMessage { host_id: auth.uid };
                    Self::feed(this.messages.subscribe(q), "message", |docs| docs)
                }),
            )
            .route(
                "/api/v1/live/transactions",
                get(async |auth: SessionAuth, State(this): State<LiveFeedRouter>| {
                    let q = HostTransactions {
                        host_id: auth.uid,
                        limit: FEED_TRANSACTIONS,
                    };
                    Self::feed(this.transactions.subscribe(q), "transactions", |docs| docs)
                }),
            )
            .route(
                "/api/v1/admin/live/payouts",
                get(async |auth: SessionAuth, State(this): State<LiveFeedRouter>| {
                    if !this.admins.iter().any(|a| *a == auth.uid) {
                        return Err(ApiError::from(anyhow::Error::new(AccessDenied(
                            "Admin privileges required".to_string(),
                        ))));
                    }
                    let sub = this.payouts.subscribe(PendingPayouts);
                    Ok(Self::feed(sub, "payouts", |docs| docs))
                }),
            )
            .with_state(me)
    }

    /// The stream owns [sub], the query stops when the client disconnects
    fn feed<T, U, F>(
        sub: Subscription<T>,
        name: &'static str,
        map: F,
    ) -> Sse<impl Stream<Item = Result<Event, axum::Error>>>
    where
        T: Clone + Send + Sync + 'static,
        U: Serialize,
        F: Fn(Vec<T>) -> Vec<U> + Send + 'static,
    {
        let stream = WatchStream::new(sub.watch()).map(move |snap| {
            let _held = &sub;
            Event::default().event(name).json_data(snap.map(&map))
        });
        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}
