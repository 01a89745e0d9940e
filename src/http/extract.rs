use crate::domain::payment::{ErrorEnvelope, ErrorPayload};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

pub const SESSION_COOKIE: &str = "payment_session";
pub const USER_HEADER: &str = "X-User-Id";

/// Authenticated student id, set by the portal's auth proxy.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub i64);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(Caller)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorEnvelope {
                        error: ErrorPayload {
                            code: "UNAUTHENTICATED".to_string(),
                            message: format!("{} header is required", USER_HEADER),
                            details: None,
                        },
                    }),
                )
                    .into_response()
            })
    }
}

/// Browser session id from the `payment_session` cookie, if any.
#[derive(Debug, Clone, Default)]
pub struct SessionId(pub Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionId(session_from_headers(&parts.headers)))
    }
}

pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(session_id: &str, ttl_secs: u64) -> String {
    // Lax so the cookie survives the top-level redirect back from the provider
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, session_id, ttl_secs
    )
}
