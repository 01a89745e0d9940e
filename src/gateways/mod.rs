use crate::codec::amount::{matches_expected, parse_display, to_display_string};
use crate::domain::application::Application;
use crate::domain::callback::{CallbackParams, Correlation};
use crate::domain::payment::{PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::PaymentError;
use crate::reconcile::engine::Verdict;
use crate::session::SessionValues;
use rust_decimal::Decimal;
use serde::Serialize;

pub mod esewa;
pub mod khalti;

/// Routes the provider redirects back to, relative to the public base URL.
#[derive(Debug, Clone, Copy)]
pub struct CallbackPaths {
    pub success: &'static str,
    pub failure: &'static str,
}

pub fn callback_paths(method: PaymentMethod) -> CallbackPaths {
    match method {
        PaymentMethod::Esewa => CallbackPaths {
            success: "/payments/esewa/success",
            failure: "/payments/esewa/failure",
        },
        PaymentMethod::Khalti => CallbackPaths {
            success: "/payments/khalti/return",
            failure: "/payments/khalti/failure",
        },
    }
}

#[derive(Debug, Clone)]
pub struct AttemptContext<'a> {
    pub application: &'a Application,
    pub record: &'a PaymentRecord,
    pub success_url: String,
    pub failure_url: String,
    pub website_url: String,
}

impl AttemptContext<'_> {
    pub fn amount_display(&self) -> String {
        to_display_string(self.record.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitiationPayload {
    /// Signed fields the browser posts straight to the provider.
    Form {
        action: String,
        fields: Vec<(String, String)>,
    },
    Redirect {
        url: String,
        #[serde(skip)]
        token: Option<String>,
        #[serde(skip)]
        session: Vec<(&'static str, String)>,
    },
}

#[async_trait::async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    fn product_code(&self) -> &str;

    /// Fresh opaque reference for a new attempt.
    fn new_reference(&self, application_id: i64) -> String;

    /// External status string to internal status; unknown values are FAILED.
    fn map_status(&self, external: &str) -> PaymentStatus;

    async fn initiate(&self, ctx: &AttemptContext<'_>) -> Result<InitiationPayload, PaymentError>;

    /// Server-to-server status lookup. Never errors: every failure is a verdict.
    async fn verify(&self, record: &PaymentRecord, correlation: &Correlation) -> Verdict;

    fn decode_callback(
        &self,
        params: &CallbackParams,
        session: &SessionValues,
    ) -> Result<Correlation, PaymentError>;

    /// Best-effort correlation for the failure redirect; `None` means no state change.
    fn decode_failure(&self, params: &CallbackParams, session: &SessionValues) -> Option<Correlation>;

    fn failure_status(&self) -> PaymentStatus;

    /// Whether initiation binds a provider token to the attempt. Callbacks for
    /// such providers must present the stored token.
    fn issues_token(&self) -> bool {
        false
    }

    fn session_keys(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Shared decision once a provider answered: success needs both the explicit
/// status and a normalized amount match.
pub fn verdict_from_report(
    mapped: PaymentStatus,
    raw_status: &str,
    expected: Decimal,
    reported_amount: Option<String>,
    gateway_transaction_id: Option<String>,
) -> Verdict {
    if mapped != PaymentStatus::Complete {
        return Verdict::Reported {
            status: mapped,
            raw: raw_status.to_string(),
        };
    }

    match reported_amount {
        Some(reported) if matches_expected(expected, &reported) => match parse_display(&reported) {
            Ok(amount) => Verdict::Completed {
                amount,
                gateway_transaction_id,
            },
            Err(_) => Verdict::AmountMismatch {
                expected: to_display_string(expected),
                reported,
            },
        },
        Some(reported) => Verdict::AmountMismatch {
            expected: to_display_string(expected),
            reported,
        },
        None => Verdict::AmountMismatch {
            expected: to_display_string(expected),
            reported: "<missing>".to_string(),
        },
    }
}

/// Providers send amounts as JSON numbers or strings.
pub fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn transport_verdict(err: reqwest::Error) -> Verdict {
    Verdict::Unverifiable {
        reason: if err.is_timeout() {
            "provider status call timed out".to_string()
        } else {
            format!("provider status call failed: {}", err)
        },
    }
}

pub(crate) fn truncated(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn fee() -> Decimal {
        Decimal::from_str("1000").unwrap()
    }

    #[test]
    fn success_requires_matching_amount() {
        assert_eq!(
            verdict_from_report(
                PaymentStatus::Complete,
                "COMPLETE",
                fee(),
                Some("1000.0".into()),
                Some("000AE01".into())
            ),
            Verdict::Completed {
                amount: Decimal::from_str("1000.00").unwrap(),
                gateway_transaction_id: Some("000AE01".into()),
            }
        );
        assert_eq!(
            verdict_from_report(PaymentStatus::Complete, "COMPLETE", fee(), Some("10.00".into()), None),
            Verdict::AmountMismatch {
                expected: "1000.00".into(),
                reported: "10.00".into(),
            }
        );
        assert!(matches!(
            verdict_from_report(PaymentStatus::Complete, "COMPLETE", fee(), None, None),
            Verdict::AmountMismatch { .. }
        ));
    }

    #[test]
    fn non_success_is_reported_regardless_of_amount() {
        assert_eq!(
            verdict_from_report(PaymentStatus::Pending, "PENDING", fee(), Some("1000.00".into()), None),
            Verdict::Reported {
                status: PaymentStatus::Pending,
                raw: "PENDING".into(),
            }
        );
    }

    #[test]
    fn json_amounts_become_strings() {
        assert_eq!(json_scalar(&serde_json::json!(100.0)).as_deref(), Some("100.0"));
        assert_eq!(json_scalar(&serde_json::json!("100.00")).as_deref(), Some("100.00"));
        assert_eq!(json_scalar(&serde_json::json!(null)), None);
    }
}
