use crate::domain::payment::{PaymentRecord, PaymentStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// What the provider's status API said about one attempt, after the adapter
/// checked status and amount.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Explicit success and the normalized amount matched.
    Completed {
        amount: Decimal,
        gateway_transaction_id: Option<String>,
    },
    /// A non-success status from the provider's table (pending, failed, canceled).
    Reported { status: PaymentStatus, raw: String },
    /// Provider said success but the amount did not match.
    AmountMismatch { expected: String, reported: String },
    /// Transport failure, timeout, non-200 or unparseable body.
    Unverifiable { reason: String },
    /// The browser came back through the failure/cancel redirect; the
    /// provider was not consulted. Only an open attempt may take `status`.
    Abandoned { status: PaymentStatus },
}

impl Verdict {
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            Verdict::Completed { .. } => PaymentStatus::Complete,
            // completion only through the amount-checked variant
            Verdict::Reported {
                status: PaymentStatus::Complete,
                ..
            } => PaymentStatus::VerificationFailed,
            Verdict::Reported { status, .. } => *status,
            Verdict::AmountMismatch { .. } => PaymentStatus::VerificationFailed,
            Verdict::Unverifiable { .. } => PaymentStatus::VerificationError,
            Verdict::Abandoned { status } => *status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Record already completed; nothing to write, no side effects.
    AlreadyCompleted,
    /// The verdict may not move the record from where it is.
    Unchanged,
    Write {
        next: PaymentRecord,
        marks_application_paid: bool,
    },
}

/// Decides the locked record's next state. Callers hold the row lock and have
/// re-read `is_completed` after acquiring it.
pub fn plan(current: &PaymentRecord, verdict: &Verdict, now: DateTime<Utc>) -> Plan {
    if current.is_completed {
        return Plan::AlreadyCompleted;
    }
    if matches!(verdict, Verdict::Abandoned { .. }) && !current.status.is_open() {
        return Plan::Unchanged;
    }

    let mut next = current.clone();
    next.status = verdict.target_status();
    next.updated_at = now;

    let completes = next.status == PaymentStatus::Complete;
    if let Verdict::Completed {
        amount,
        gateway_transaction_id,
    } = verdict
    {
        next.is_completed = true;
        next.amount = *amount;
        next.payment_date = Some(now);
        if gateway_transaction_id.is_some() {
            next.gateway_transaction_id = gateway_transaction_id.clone();
        }
    }

    Plan::Write {
        next,
        marks_application_paid: completes,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Transitioned {
        previous: PaymentStatus,
        record: PaymentRecord,
    },
    AlreadyCompleted(PaymentRecord),
    Unchanged(PaymentRecord),
    /// The attempt was superseded by a newer initiation while we verified.
    Stale,
    NotFound,
}

impl ReconcileOutcome {
    /// True only on the edge into COMPLETE; gates notifications.
    pub fn completed_now(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Transitioned { record, .. } if record.is_completed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentMethod;
    use std::str::FromStr;

    fn record(status: PaymentStatus, completed: bool) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: 1,
            application_id: 7,
            user_id: 3,
            transaction_reference: "ref-1".to_string(),
            gateway_transaction_id: None,
            gateway_token: None,
            amount: Decimal::from_str("1000.00").unwrap(),
            product_code: "EPAYTEST".to_string(),
            status,
            is_completed: completed,
            method: PaymentMethod::Esewa,
            payment_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn completed(txn: Option<&str>) -> Verdict {
        Verdict::Completed {
            amount: Decimal::from_str("1000.00").unwrap(),
            gateway_transaction_id: txn.map(str::to_string),
        }
    }

    #[test]
    fn success_completes_and_marks_paid() {
        let now = Utc::now();
        let Plan::Write {
            next,
            marks_application_paid,
        } = plan(&record(PaymentStatus::Initiated, false), &completed(Some("000AE01")), now)
        else {
            panic!("expected a write");
        };
        assert!(marks_application_paid);
        assert!(next.is_completed);
        assert_eq!(next.status, PaymentStatus::Complete);
        assert_eq!(next.gateway_transaction_id.as_deref(), Some("000AE01"));
        assert_eq!(next.payment_date, Some(now));
    }

    #[test]
    fn completed_record_is_never_rewritten() {
        let mut done = record(PaymentStatus::Complete, true);
        done.gateway_transaction_id = Some("first".to_string());
        let now = Utc::now();

        assert_eq!(plan(&done, &completed(Some("second")), now), Plan::AlreadyCompleted);
        assert_eq!(
            plan(
                &done,
                &Verdict::Unverifiable {
                    reason: "timeout".into()
                },
                now
            ),
            Plan::AlreadyCompleted
        );
        assert_eq!(
            plan(
                &done,
                &Verdict::Reported {
                    status: PaymentStatus::Failed,
                    raw: "FAILED".into()
                },
                now
            ),
            Plan::AlreadyCompleted
        );
    }

    #[test]
    fn completed_record_without_gateway_reference_stays_untouched() {
        let done = record(PaymentStatus::Complete, true);
        assert_eq!(
            plan(&done, &completed(Some("000AE01")), Utc::now()),
            Plan::AlreadyCompleted
        );
    }

    #[test]
    fn failures_map_to_distinct_statuses() {
        let open = record(PaymentStatus::Initiated, false);
        let cases = [
            (
                Verdict::Unverifiable {
                    reason: "timeout".into(),
                },
                PaymentStatus::VerificationError,
            ),
            (
                Verdict::AmountMismatch {
                    expected: "1000.00".into(),
                    reported: "10.00".into(),
                },
                PaymentStatus::VerificationFailed,
            ),
            (
                Verdict::Reported {
                    status: PaymentStatus::Canceled,
                    raw: "User canceled".into(),
                },
                PaymentStatus::Canceled,
            ),
            (
                Verdict::Reported {
                    status: PaymentStatus::Complete,
                    raw: "COMPLETE".into(),
                },
                PaymentStatus::VerificationFailed,
            ),
        ];
        for (verdict, expected) in cases {
            match plan(&open, &verdict, Utc::now()) {
                Plan::Write {
                    next,
                    marks_application_paid,
                } => {
                    assert_eq!(next.status, expected);
                    assert!(!next.is_completed);
                    assert!(!marks_application_paid);
                    assert_eq!(next.amount, open.amount);
                }
                other => panic!("unexpected plan {:?}", other),
            }
        }
    }

    #[test]
    fn failure_redirect_only_closes_open_attempts() {
        let abandoned = Verdict::Abandoned {
            status: PaymentStatus::Failed,
        };
        for status in [PaymentStatus::Initiated, PaymentStatus::Pending] {
            assert!(matches!(
                plan(&record(status, false), &abandoned, Utc::now()),
                Plan::Write { next, marks_application_paid: false } if next.status == PaymentStatus::Failed
            ));
        }
        for status in [
            PaymentStatus::VerificationError,
            PaymentStatus::VerificationFailed,
            PaymentStatus::Canceled,
        ] {
            assert_eq!(
                plan(&record(status, false), &abandoned, Utc::now()),
                Plan::Unchanged
            );
        }
        assert_eq!(
            plan(&record(PaymentStatus::Complete, true), &abandoned, Utc::now()),
            Plan::AlreadyCompleted
        );
    }

    #[test]
    fn verification_error_can_still_complete() {
        let retry = record(PaymentStatus::VerificationError, false);
        assert!(matches!(
            plan(&retry, &completed(None), Utc::now()),
            Plan::Write {
                marks_application_paid: true,
                ..
            }
        ));
    }
}
