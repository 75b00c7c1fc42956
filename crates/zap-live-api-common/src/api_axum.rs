use crate::{ApiError, LimitQueryV1, PatchHost, PayRequest, RespondRequest};
use crate::{
    BecomeHostRequest, CreateStreamRequest, HasAuthSecret, ImageRequest, RecommendRequest,
    SessionAuth, ZapLiveApi,
};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Axum router which passes calls to the internal [ZapLiveApi]
#[derive(Clone)]
pub struct AxumApi<T>
where
    T: ZapLiveApi + 'static,
{
    handler: T,
}

impl<T> HasAuthSecret for AxumApi<T>
where
    T: ZapLiveApi + 'static,
{
    fn auth_secret(&self) -> &str {
        self.handler.auth_secret()
    }
}

impl<T> AxumApi<T>
where
    T: ZapLiveApi + 'static,
{
    pub fn new(handler: T) -> Router {
        Router::new()
            .route(
                "/api/v1/auth/anonymous",
                post(async |State(this): State<AxumApi<T>>| {
                    match this.handler.create_session().await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/account",
                get(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.get_account(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/history",
                get(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Query(q): Query<LimitQueryV1>| {
                        match this.handler.get_history(auth, q.limit).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/host",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<BecomeHostRequest>| {
                        match this.handler.become_host(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                )
                .patch(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<PatchHost>| {
                        match this.handler.update_host(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/host/live",
                post(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.go_live(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                })
                .delete(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.end_live(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/host/live/heartbeat",
                post(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.heartbeat(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/hosts/live",
                get(async |State(this): State<AxumApi<T>>| {
                    match this.handler.list_live_hosts().await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/hosts/{id}",
                get(
                    async |State(this): State<AxumApi<T>>, Path(id): Path<String>| match this
                        .handler
                        .get_host(id)
                        .await
                    {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    },
                ),
            )
            .route(
                "/api/v1/pay",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<PayRequest>| {
                        match this.handler.pay(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/requests",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<CreateStreamRequest>| {
                        match this.handler.create_request(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/requests/{id}",
                patch(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Path(id): Path<String>,
                           Json(req): Json<RespondRequest>| {
                        match this.handler.respond_request(auth, id, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/messages/latest",
                get(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.latest_message(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/payouts",
                post(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.request_payout(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/verify-face",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<ImageRequest>| {
                        match this.handler.verify_face(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/recommend",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumApi<T>>,
                           Json(req): Json<RecommendRequest>| {
                        match this.handler.recommend(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/profile/optimize",
                post(async |auth: SessionAuth, State(this): State<AxumApi<T>>| {
                    match this.handler.optimize_profile(auth).await {
                        Ok(r) => Ok(Json(r)),
                        Err(e) => Err(ApiError::from(e)),
                    }
                }),
            )
            .route(
                "/api/v1/time",
                get(async || {
                    Json(TimeResponse {
                        time: SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or_default(),
                    })
                }),
            )
            .with_state(AxumApi { handler })
    }
}

#[derive(Serialize)]
struct TimeResponse {
    time: u64,
}
