use crate::domain::payment::PaymentStatus;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

/// Ready when Postgres and Redis both answer. The backlog of attempts waiting
/// on `payment_verifier` is reported but never gates readiness.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let redis_ok = ping_redis(&state.redis_client).await;
    let awaiting_reverify = if db_ok {
        count_awaiting_reverify(&state.pool).await
    } else {
        None
    };

    let (status, body) = readiness_body(db_ok, redis_ok, awaiting_reverify);
    (status, Json(body)).into_response()
}

pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"alive": true}))).into_response()
}

async fn ping_redis(client: &redis::Client) -> bool {
    let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
        return false;
    };
    let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
    pong.is_ok()
}

async fn count_awaiting_reverify(pool: &sqlx::PgPool) -> Option<i64> {
    match sqlx::query_scalar::<_, i64>("SELECT count(*) FROM payment_records WHERE status = $1")
        .bind(PaymentStatus::VerificationError.as_str())
        .fetch_one(pool)
        .await
    {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("readiness could not count unverified payments: {}", e);
            None
        }
    }
}

pub fn readiness_body(db_ok: bool, redis_ok: bool, awaiting_reverify: Option<i64>) -> (StatusCode, Value) {
    let ready = db_ok && redis_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        json!({
            "ready": ready,
            "db": db_ok,
            "redis": redis_ok,
            "payments_awaiting_reverify": awaiting_reverify,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_needs_db_and_redis() {
        let (status, body) = readiness_body(true, true, Some(3));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], json!(true));
        assert_eq!(body["payments_awaiting_reverify"], json!(3));

        let (status, body) = readiness_body(true, false, Some(0));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["redis"], json!(false));
    }

    #[test]
    fn backlog_is_null_when_it_cannot_be_counted() {
        let (status, body) = readiness_body(false, true, None);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], json!(false));
        assert!(body["payments_awaiting_reverify"].is_null());
    }
}
