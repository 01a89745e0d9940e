use crate::domain::callback::CallbackParams;
use crate::domain::payment::{PaymentMethod, PaymentStatus};
use crate::error::PaymentError;
use crate::http::extract::{session_cookie, Caller, SessionId};
use crate::service::payment_service::CallbackOutcome;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use std::collections::HashMap;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn initiate_esewa(
    state: State<AppState>,
    path: Path<i64>,
    caller: Caller,
    session: SessionId,
) -> Response {
    initiate(state, PaymentMethod::Esewa, path, caller, session).await
}

pub async fn initiate_khalti(
    state: State<AppState>,
    path: Path<i64>,
    caller: Caller,
    session: SessionId,
) -> Response {
    initiate(state, PaymentMethod::Khalti, path, caller, session).await
}

async fn initiate(
    State(state): State<AppState>,
    method: PaymentMethod,
    Path(application_id): Path<i64>,
    Caller(caller): Caller,
    SessionId(session_id): SessionId,
) -> Response {
    let (session_id, fresh) = match session_id {
        Some(id) => (id, false),
        None => (uuid::Uuid::new_v4().to_string(), true),
    };

    let result = state
        .payment_service
        .initiate(method, application_id, caller, Some(&session_id))
        .await;

    let mut response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => return e.into_response(),
    };
    if fresh {
        if let Ok(value) = HeaderValue::from_str(&session_cookie(&session_id, state.session_ttl_secs)) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

pub async fn esewa_success(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    session: SessionId,
) -> Response {
    callback(state, PaymentMethod::Esewa, query, session).await
}

pub async fn khalti_return(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    session: SessionId,
) -> Response {
    callback(state, PaymentMethod::Khalti, query, session).await
}

async fn callback(
    State(state): State<AppState>,
    method: PaymentMethod,
    Query(query): Query<HashMap<String, String>>,
    SessionId(session_id): SessionId,
) -> Response {
    let result = state
        .payment_service
        .handle_callback(method, CallbackParams(query), session_id.as_deref())
        .await;

    // the browser only ever sees a generic outcome
    let outcome = match result {
        Ok(report) => match report.outcome {
            CallbackOutcome::Paid => "success",
            CallbackOutcome::AlreadyPaid => "already_verified",
            CallbackOutcome::Pending => "pending",
        },
        Err(e @ PaymentError::Internal(_)) => return e.into_response(),
        Err(_) => "failed",
    };
    Redirect::to(&dashboard_redirect(&state.dashboard_url, outcome)).into_response()
}

pub async fn esewa_failure(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    session: SessionId,
) -> Redirect {
    failure(state, PaymentMethod::Esewa, query, session).await
}

pub async fn khalti_failure(
    state: State<AppState>,
    query: Query<HashMap<String, String>>,
    session: SessionId,
) -> Redirect {
    failure(state, PaymentMethod::Khalti, query, session).await
}

async fn failure(
    State(state): State<AppState>,
    method: PaymentMethod,
    Query(query): Query<HashMap<String, String>>,
    SessionId(session_id): SessionId,
) -> Redirect {
    let outcome = match state
        .payment_service
        .handle_failure(method, CallbackParams(query), session_id.as_deref())
        .await
    {
        Ok(Some(record)) if record.status == PaymentStatus::Complete => "already_verified",
        Ok(Some(record)) if record.status == PaymentStatus::Canceled => "canceled",
        Ok(_) => "failed",
        Err(e) => {
            tracing::error!("{} failure redirect errored: {}", method, e);
            "failed"
        }
    };
    Redirect::to(&dashboard_redirect(&state.dashboard_url, outcome))
}

pub async fn admin_get_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    let record = state.payment_service.payment(&reference).await?;
    Ok(Json(record))
}

pub async fn admin_reverify(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, PaymentError> {
    tracing::info!("manual re-verification requested for {}", reference);
    let report = state.payment_service.reverify(&reference).await?;
    Ok(Json(report))
}

pub fn dashboard_redirect(dashboard_url: &str, outcome: &str) -> String {
    let sep = if dashboard_url.contains('?') { '&' } else { '?' };
    format!("{}{}payment={}", dashboard_url, sep, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_redirect_appends_outcome() {
        assert_eq!(
            dashboard_redirect("https://portal.test/student/dashboard", "success"),
            "https://portal.test/student/dashboard?payment=success"
        );
        assert_eq!(
            dashboard_redirect("https://portal.test/dash?tab=fees", "failed"),
            "https://portal.test/dash?tab=fees&payment=failed"
        );
    }
}
