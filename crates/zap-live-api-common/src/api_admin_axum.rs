use crate::{AdminHostRequest, AdminMessageRequest, ErrorReportRequest, ImageRequest};
use crate::{ApiError, HasAuthSecret, SessionAuth, ZapLiveAdminApi};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use zap_live_db::PayoutStatus;

/// Axum router which passes calls to the internal [ZapLiveAdminApi]
#[derive(Clone)]
pub struct AxumAdminApi<T>
where
    T: ZapLiveAdminApi + 'static,
{
    handler: T,
}

impl<T> HasAuthSecret for AxumAdminApi<T>
where
    T: ZapLiveAdminApi + 'static,
{
    fn auth_secret(&self) -> &str {
        self.handler.auth_secret()
    }
}

impl<T> AxumAdminApi<T>
where
    T: ZapLiveAdminApi + 'static,
{
    pub fn new(handler: T) -> Router {
        Router::new()
            .route(
                "/api/v1/admin/payouts",
                get(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Query(q): Query<PayoutsV1Query>| {
                        match this.handler.get_payouts(auth, q.status).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/admin/payouts/{id}/paid",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Path(id): Path<String>| {
                        match this.handler.mark_payout_paid(auth, id).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/admin/hosts/{id}",
                patch(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Path(id): Path<String>,
                           Json(req): Json<AdminHostRequest>| {
                        match this.handler.update_host(auth, id, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/admin/hosts/{id}/message",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Path(id): Path<String>,
                           Json(req): Json<AdminMessageRequest>| {
                        match this.handler.send_message(auth, id, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/admin/hosts/{id}/moderate",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Path(id): Path<String>,
                           Json(req): Json<ImageRequest>| {
                        match this.handler.moderate_host(auth, id, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .route(
                "/api/v1/admin/error-report",
                post(
                    async |auth: SessionAuth,
                           State(this): State<AxumAdminApi<T>>,
                           Json(req): Json<ErrorReportRequest>| {
                        match this.handler.error_report(auth, req).await {
                            Ok(r) => Ok(Json(r)),
                            Err(e) => Err(ApiError::from(e)),
                        }
                    },
                ),
            )
            .with_state(AxumAdminApi { handler })
    }
}

#[derive(Deserialize)]
struct PayoutsV1Query {
    status: Option<PayoutStatus>,
}
