//! Store behaviour against a real Postgres. Runs only when `DATABASE_URL` is set.

use admission_payments::domain::callback::RecordKey;
use admission_payments::domain::payment::{NewAttempt, PaymentMethod, PaymentStatus};
use admission_payments::reconcile::engine::{ReconcileOutcome, Verdict};
use admission_payments::reconcile::store::{AttemptStart, PaymentStore};
use admission_payments::repo::payments_repo::PaymentsRepo;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::str::FromStr;

async fn pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    Some(pool)
}

async fn seed_application(pool: &PgPool, user_id: i64) -> i64 {
    let course_id: i64 = sqlx::query_scalar(
        "INSERT INTO courses (course_name, course_fee) VALUES ('BSc Computing', 1000.00) RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    sqlx::query_scalar("INSERT INTO applications (user_id, course_id) VALUES ($1, $2) RETURNING id")
        .bind(user_id)
        .bind(course_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn attempt(application_id: i64, user_id: i64) -> NewAttempt {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    NewAttempt {
        user_id,
        transaction_reference: format!("APP-{}-{}", application_id, &hex[..12]),
        amount: Decimal::from_str("1000.00").unwrap(),
        product_code: "EPAYTEST".to_string(),
        method: PaymentMethod::Esewa,
    }
}

fn completed(code: &str) -> Verdict {
    Verdict::Completed {
        amount: Decimal::from_str("1000.00").unwrap(),
        gateway_transaction_id: Some(code.to_string()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reconciles_complete_exactly_once() {
    let Some(pool) = pool().await else { return };
    let repo = PaymentsRepo::new(pool.clone());
    let application_id = seed_application(&pool, 501).await;
    let new = attempt(application_id, 501);
    assert!(matches!(
        repo.begin_attempt(application_id, &new).await.unwrap(),
        AttemptStart::Created(_)
    ));

    let by_reference = RecordKey::Reference(new.transaction_reference.clone());
    let by_application = RecordKey::Application(application_id);
    let first = completed("REF-A");
    let second = completed("REF-B");
    let (a, b) = tokio::join!(
        repo.reconcile(&by_reference, &new.transaction_reference, &first),
        repo.reconcile(&by_application, &new.transaction_reference, &second),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let transitioned = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Transitioned { .. }))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::AlreadyCompleted(_)))
        .count();
    assert_eq!((transitioned, already), (1, 1));
    assert_eq!(outcomes.iter().filter(|o| o.completed_now()).count(), 1);

    let record = repo
        .payment_by_reference(&new.transaction_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Complete);
    assert!(record.is_completed);
    assert!(record.payment_date.is_some());
    assert!(repo.application(application_id).await.unwrap().unwrap().is_paid);
}

#[tokio::test]
async fn superseded_reference_is_stale_and_paid_application_refuses_attempts() {
    let Some(pool) = pool().await else { return };
    let repo = PaymentsRepo::new(pool.clone());
    let application_id = seed_application(&pool, 502).await;

    let old = attempt(application_id, 502);
    repo.begin_attempt(application_id, &old).await.unwrap();
    repo.attach_gateway_token(&old.transaction_reference, "PIDX-OLD")
        .await
        .unwrap();
    let new = attempt(application_id, 502);
    let AttemptStart::Superseded(record) = repo.begin_attempt(application_id, &new).await.unwrap() else {
        panic!("open attempt should be superseded");
    };
    assert_eq!(record.transaction_reference, new.transaction_reference);
    assert!(record.gateway_token.is_none());

    let verdict = completed("REF-OLD");
    assert_eq!(
        repo.reconcile(
            &RecordKey::Application(application_id),
            &old.transaction_reference,
            &verdict
        )
        .await
        .unwrap(),
        ReconcileOutcome::Stale
    );
    assert_eq!(
        repo.reconcile(
            &RecordKey::Reference(old.transaction_reference.clone()),
            &old.transaction_reference,
            &verdict
        )
        .await
        .unwrap(),
        ReconcileOutcome::NotFound
    );
    assert!(!repo.application(application_id).await.unwrap().unwrap().is_paid);

    let outcome = repo
        .reconcile(
            &RecordKey::Reference(new.transaction_reference.clone()),
            &new.transaction_reference,
            &completed("REF-NEW"),
        )
        .await
        .unwrap();
    assert!(outcome.completed_now());
    assert_eq!(
        repo.begin_attempt(application_id, &attempt(application_id, 502))
            .await
            .unwrap(),
        AttemptStart::AlreadyPaid
    );
}

#[tokio::test]
async fn failure_redirect_does_not_close_an_unverified_attempt() {
    let Some(pool) = pool().await else { return };
    let repo = PaymentsRepo::new(pool.clone());
    let application_id = seed_application(&pool, 503).await;
    let new = attempt(application_id, 503);
    repo.begin_attempt(application_id, &new).await.unwrap();
    let key = RecordKey::Reference(new.transaction_reference.clone());

    let outcome = repo
        .reconcile(
            &key,
            &new.transaction_reference,
            &Verdict::Unverifiable {
                reason: "timed out".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Transitioned { .. }));

    let outcome = repo
        .reconcile(
            &key,
            &new.transaction_reference,
            &Verdict::Abandoned {
                status: PaymentStatus::Failed,
            },
        )
        .await
        .unwrap();
    let ReconcileOutcome::Unchanged(record) = outcome else {
        panic!("unverified attempt should be left alone, got {:?}", outcome);
    };
    assert_eq!(record.status, PaymentStatus::VerificationError);

    let due = repo
        .list_by_status(PaymentStatus::VerificationError, 100)
        .await
        .unwrap();
    assert!(due
        .iter()
        .any(|r| r.transaction_reference == new.transaction_reference));
}
