use anyhow::{Result, anyhow, bail};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use zap_live_db::{PermissionError, WriteError};

mod api;
pub use api::*;
mod model;
pub use model::*;

#[cfg(feature = "admin")]
mod api_admin;
#[cfg(feature = "admin")]
pub use api_admin::*;
#[cfg(feature = "axum")]
mod api_axum;
#[cfg(feature = "axum")]
pub use api_axum::*;
#[cfg(all(feature = "axum", feature = "admin"))]
mod api_admin_axum;
#[cfg(all(feature = "axum", feature = "admin"))]
pub use api_admin_axum::*;

/// Provides the secret used to sign and verify session tokens
pub trait HasAuthSecret {
    fn auth_secret(&self) -> &str;
}

/// How long an issued session token stays valid
pub const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Anonymous session identity, proven by an HS256 bearer token
#[derive(Clone, Debug, PartialEq)]
pub struct SessionAuth {
    pub uid: String,
}

impl SessionAuth {
    fn encode_claims(secret: &str, claims: &SessionClaims) -> Result<String> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }

    /// Create a bearer token for [uid], valid for [SESSION_TTL_DAYS]
    pub fn issue_token(secret: &str, uid: &str) -> Result<String> {
        let now = Utc::now();
        Self::encode_claims(
            secret,
            &SessionClaims {
                sub: uid.to_string(),
                iat: now.timestamp(),
                exp: (now + Duration::days(SESSION_TTL_DAYS)).timestamp(),
            },
        )
    }

    pub fn try_from_token(secret: &str, token: &str) -> Result<Self> {
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| anyhow!("Invalid token, {}", e))?;
        if data.claims.sub.is_empty() {
            bail!("Invalid token, missing uid");
        }
        Ok(Self {
            uid: data.claims.sub,
        })
    }

    fn try_from_header(secret: &str, header: Option<&str>) -> Result<Self, (u16, String)> {
        let Some(auth) = header else {
            return Err((401, "Missing authorization header".to_string()));
        };
        let Some((scheme, token)) = auth.split_once(' ') else {
            return Err((400, "Invalid authorization header".to_string()));
        };
        if !scheme.eq_ignore_ascii_case("Bearer") {
            return Err((400, format!("Invalid scheme {}", scheme)));
        }
        Self::try_from_token(secret, token.trim())
            .map_err(|e| (401, format!("Could not verify session token {}", e)))
    }
}

#[cfg(feature = "axum")]
use axum::http::*;

#[cfg(feature = "axum")]
impl<S> axum::extract::FromRequestParts<S> for SessionAuth
where
    S: HasAuthSecret + Send + Sync,
{
    type Rejection = (StatusCode, String);

    fn from_request_parts(
        parts: &mut request::Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .map(|h| h.to_str().map_err(|e| e.to_string()));
        let r = match header {
            Some(Err(e)) => Err((400, format!("Invalid authorization header {}", e))),
            Some(Ok(h)) => SessionAuth::try_from_header(state.auth_secret(), Some(h)),
            None => SessionAuth::try_from_header(state.auth_secret(), None),
        }
        .map_err(|(code, msg)| {
            (
                StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST),
                msg,
            )
        });
        std::future::ready(r)
    }
}

/// The caller is authenticated but may not use this route
#[derive(Debug, Clone)]
pub struct AccessDenied(pub String);

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Access denied: {}", self.0)
    }
}

impl std::error::Error for AccessDenied {}

/// Error body returned by every API route.
///
/// A rejected write is returned as `403` with `fatal: true`, clients show the full-screen
/// "connection dropped" view and offer a reload. [AccessDenied] is a plain `403`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionError>,
    #[serde(default)]
    pub fatal: bool,
    #[serde(skip)]
    pub denied: bool,
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let permission = error
            .downcast_ref::<WriteError>()
            .and_then(|e| e.permission())
            .cloned();
        Self {
            error: error.to_string(),
            fatal: permission.is_some(),
            denied: error.downcast_ref::<AccessDenied>().is_some(),
            permission,
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = if self.fatal || self.denied {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, axum::Json(self)).into_response()
    }
}

#[derive(Deserialize)]
pub(crate) struct LimitQueryV1 {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use zap_live_db::Operation;

    #[test]
    fn test_token_round_trip() -> Result<()> {
        let token = SessionAuth::issue_token("secret", "u1")?;
        assert_eq!(
            SessionAuth::try_from_token("secret", &token)?,
            SessionAuth {
                uid: "u1".to_string()
            }
        );
        assert!(SessionAuth::try_from_token("other", &token).is_err());
        assert!(SessionAuth::try_from_token("secret", "u1.abcd").is_err());
        assert!(SessionAuth::try_from_token("secret", "nodot").is_err());
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> Result<()> {
        let past = Utc::now() - Duration::days(SESSION_TTL_DAYS + 1);
        let token = SessionAuth::encode_claims(
            "secret",
            &SessionClaims {
                sub: "u1".to_string(),
                iat: past.timestamp(),
                exp: (past + Duration::hours(1)).timestamp(),
            },
        )?;
        assert!(SessionAuth::try_from_token("secret", &token).is_err());
        Ok(())
    }

    #[test]
    fn test_token_without_subject_rejected() -> Result<()> {
        let now = Utc::now();
        let token = SessionAuth::encode_claims(
            "secret",
            &SessionClaims {
                sub: String::new(),
                iat: now.timestamp(),
                exp: (now + Duration::hours(1)).timestamp(),
            },
        )?;
        assert!(SessionAuth::try_from_token("secret", &token).is_err());
        Ok(())
    }

    #[test]
    fn test_header_parsing() -> Result<()> {
        let token = SessionAuth::issue_token("s", "u1")?;
        assert!(SessionAuth::try_from_header("s", Some(&format!("Bearer {}", token))).is_ok());
        assert_eq!(SessionAuth::try_from_header("s", None).unwrap_err().0, 401);
        assert_eq!(
            SessionAuth::try_from_header("s", Some(&format!("Nostr {}", token)))
                .unwrap_err()
                .0,
            400
        );
        Ok(())
    }

    #[test]
    fn test_api_error_permission_is_fatal() {
        let err: anyhow::Error = WriteError::PermissionDenied(PermissionError {
            path: "users/u1".to_string(),
            operation: Operation::Update,
            request_data: None,
        })
        .into();
        let api = ApiError::from(err);
        assert!(api.fatal);
        assert_eq!(api.permission.map(|p| p.path), Some("users/u1".to_string()));

        let api = ApiError::from(anyhow::anyhow!("Host not found"));
        assert!(!api.fatal);
        assert!(!api.denied);
        assert!(api.permission.is_none());
    }

    #[test]
    fn test_access_denied_is_not_fatal() {
        let api = ApiError::from(anyhow::Error::new(AccessDenied(
            "Admin privileges required".to_string(),
        )));
        assert!(api.denied);
        assert!(!api.fatal);
        assert_eq!(api.error, "Access denied: Admin privileges required");
    }
}
