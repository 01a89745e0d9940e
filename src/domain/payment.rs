use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Esewa,
    Khalti,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Esewa => "ESEWA",
            PaymentMethod::Khalti => "KHALTI",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PaymentMethod::Esewa => "e-Sewa",
            PaymentMethod::Khalti => "Khalti",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ESEWA" => Ok(PaymentMethod::Esewa),
            "KHALTI" => Ok(PaymentMethod::Khalti),
            other => Err(anyhow::anyhow!("unknown payment method `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Complete,
    Failed,
    Canceled,
    VerificationError,
    VerificationFailed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Complete => "COMPLETE",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
            PaymentStatus::VerificationError => "VERIFICATION_ERROR",
            PaymentStatus::VerificationFailed => "VERIFICATION_FAILED",
        }
    }

    /// Attempts still waiting on the browser or the provider.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Initiated | PaymentStatus::Pending)
    }

    /// Statuses an operator (or the sweeper) may send back to the provider.
    pub fn is_reverifiable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Initiated | PaymentStatus::Pending | PaymentStatus::VerificationError
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INITIATED" => PaymentStatus::Initiated,
            "PENDING" => PaymentStatus::Pending,
            "COMPLETE" => PaymentStatus::Complete,
            "FAILED" => PaymentStatus::Failed,
            "CANCELED" => PaymentStatus::Canceled,
            "VERIFICATION_ERROR" => PaymentStatus::VerificationError,
            "VERIFICATION_FAILED" => PaymentStatus::VerificationFailed,
            other => anyhow::bail!("unknown payment status `{}`", other),
        })
    }
}

/// One payment attempt per application. `is_completed` is the paid gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub application_id: i64,
    pub user_id: i64,
    pub transaction_reference: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_token: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub product_code: String,
    pub status: PaymentStatus,
    pub is_completed: bool,
    pub method: PaymentMethod,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written when an attempt is created or superseded.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub user_id: i64,
    pub transaction_reference: String,
    pub amount: Decimal,
    pub product_code: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}
