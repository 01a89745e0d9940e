use crate::domain::payment::{ErrorEnvelope, ErrorPayload};
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub const ADMIN_HEADER: &str = "X-Admin-Api-Key";

pub async fn require_admin_api_key(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if expected.is_empty() || provided != expected {
        tracing::warn!("rejected admin request to {}", request.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorEnvelope {
                error: ErrorPayload {
                    code: "UNAUTHORIZED".to_string(),
                    message: "admin api key required".to_string(),
                    details: None,
                },
            }),
        )
            .into_response();
    }

    next.run(request).await
}
