use rust_decimal::Decimal;
use serde::Serialize;

/// The slice of an admission application that payment needs: owner, course fee, paid flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub course_name: String,
    pub course_code: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub course_fee: Decimal,
    pub is_paid: bool,
}
