use crate::codec::amount::AmountError;
use crate::config::ConfigError;
use crate::domain::payment::{ErrorEnvelope, ErrorPayload, PaymentStatus};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("caller {caller} may not pay for application {application_id}")]
    Authorization { caller: i64, application_id: i64 },
    #[error("malformed callback: {0}")]
    MalformedCallback(String),
    #[error("could not reach payment provider: {0}")]
    Transport(String),
    #[error("provider verification did not confirm payment: {0}")]
    VerificationMismatch(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("payment initiation failed: {0}")]
    Initiation(String),
    #[error(transparent)]
    InvalidAmount(#[from] AmountError),
    #[error("payment {reference} in status {status} cannot be re-verified")]
    NotRetryable {
        reference: String,
        status: PaymentStatus,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Configuration(_) => "CONFIGURATION_ERROR",
            PaymentError::Authorization { .. } => "FORBIDDEN",
            PaymentError::MalformedCallback(_) => "MALFORMED_CALLBACK",
            PaymentError::Transport(_) => "PROVIDER_UNREACHABLE",
            PaymentError::VerificationMismatch(_) => "VERIFICATION_FAILED",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::Initiation(_) => "INITIATION_FAILED",
            PaymentError::InvalidAmount(_) => "INVALID_AMOUNT",
            PaymentError::NotRetryable { .. } => "NOT_RETRYABLE",
            PaymentError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Configuration(_) | PaymentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PaymentError::Authorization { .. } => StatusCode::FORBIDDEN,
            PaymentError::MalformedCallback(_)
            | PaymentError::Initiation(_)
            | PaymentError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            PaymentError::Transport(_) => StatusCode::BAD_GATEWAY,
            PaymentError::VerificationMismatch(_) | PaymentError::NotRetryable { .. } => {
                StatusCode::CONFLICT
            }
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        // internal details stay in the logs
        let message = match self {
            PaymentError::Internal(_) | PaymentError::Configuration(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorEnvelope {
            error: ErrorPayload {
                code: self.code().to_string(),
                message,
                details: None,
            },
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        if let PaymentError::Internal(e) = &self {
            tracing::error!("internal error: {:#}", e);
        }
        (self.status_code(), Json(self.envelope())).into_response()
    }
}
