use crate::codec::amount::{from_minor_units, to_display_string, to_minor_units};
use crate::config::KhaltiConfig;
use crate::domain::callback::{CallbackParams, Correlation, RecordKey};
use crate::domain::payment::{PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::PaymentError;
use crate::gateways::{
    json_scalar, transport_verdict, truncated, verdict_from_report, AttemptContext, GatewayAdapter,
    InitiationPayload,
};
use crate::reconcile::engine::Verdict;
use crate::session::{keys, SessionValues};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub fn map_khalti_status(raw: &str) -> PaymentStatus {
    let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "COMPLETED" => PaymentStatus::Complete,
        "PENDING" | "INITIATED" => PaymentStatus::Pending,
        "USER_CANCELED" | "USER_CANCELLED" | "CANCELED" | "CANCELLED" => PaymentStatus::Canceled,
        // EXPIRED, REFUNDED, PARTIALLY_REFUNDED and anything new
        _ => PaymentStatus::Failed,
    }
}

/// `APP-<id>-<hex>` as issued by `new_reference`.
pub fn application_id_from_order(order_id: &str) -> Option<i64> {
    let rest = order_id.trim().strip_prefix("APP-")?;
    let (id, _) = rest.split_once('-')?;
    id.parse().ok()
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    #[serde(default)]
    pidx: Option<String>,
    #[serde(default)]
    payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_amount: Option<Value>,
    #[serde(default)]
    transaction_id: Option<String>,
}

pub struct KhaltiGateway {
    config: KhaltiConfig,
    client: reqwest::Client,
}

impl KhaltiGateway {
    pub fn new(mut config: KhaltiConfig, client: reqwest::Client) -> Self {
        config.secret_key = config.secret_key.trim().to_string();
        Self { config, client }
    }

    fn authorization(&self) -> String {
        format!("Key {}", self.config.secret_key)
    }
}

#[async_trait::async_trait]
impl GatewayAdapter for KhaltiGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Khalti
    }

    fn product_code(&self) -> &str {
        "KHALTI"
    }

    fn new_reference(&self, application_id: i64) -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("APP-{}-{}", application_id, &hex[..12])
    }

    fn map_status(&self, external: &str) -> PaymentStatus {
        map_khalti_status(external)
    }

    async fn initiate(&self, ctx: &AttemptContext<'_>) -> Result<InitiationPayload, PaymentError> {
        let amount_paisa = to_minor_units(&ctx.amount_display())?;
        let application = ctx.application;
        let reference = &ctx.record.transaction_reference;
        let order_name = format!("Application fee: {}", application.course_name);

        let body = json!({
            "return_url": ctx.success_url,
            "website_url": ctx.website_url,
            "amount": amount_paisa,
            "purchase_order_id": reference,
            "purchase_order_name": order_name,
            "product_details": [{
                "identity": application.course_code.clone().unwrap_or_else(|| application.course_id.to_string()),
                "name": application.course_name,
                "total_price": amount_paisa,
                "quantity": 1,
                "unit_price": amount_paisa,
            }],
            "merchant_application_id": application.id,
            "merchant_course_id": application.course_id,
            "merchant_user_id": application.user_id,
        });

        let resp = self
            .client
            .post(&self.config.initiate_url)
            .header("Authorization", self.authorization())
            .json(&body)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await;

        let parsed: InitiateResponse = match resp {
            Ok(r) if r.status().is_success() => r
                .json()
                .await
                .map_err(|e| PaymentError::Initiation(format!("unparseable khalti response: {}", e)))?,
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_default();
                return Err(PaymentError::Initiation(format!(
                    "khalti returned HTTP {}: {}",
                    status.as_u16(),
                    truncated(&text)
                )));
            }
            Err(e) if e.is_timeout() => {
                return Err(PaymentError::Initiation("khalti initiation timed out".to_string()))
            }
            Err(e) => return Err(PaymentError::Initiation(format!("khalti initiation failed: {}", e))),
        };

        let (Some(url), Some(pidx)) = (parsed.payment_url, parsed.pidx) else {
            return Err(PaymentError::Initiation(
                "khalti response lacks payment_url or pidx".to_string(),
            ));
        };

        Ok(InitiationPayload::Redirect {
            url,
            token: Some(pidx.clone()),
            session: vec![
                (keys::KHALTI_PIDX, pidx),
                (keys::KHALTI_ORDER_ID, reference.clone()),
                (keys::KHALTI_APPLICATION_ID, application.id.to_string()),
                (keys::KHALTI_AMOUNT_PAISA, amount_paisa.to_string()),
                (keys::KHALTI_COURSE_NAME, application.course_name.clone()),
            ],
        })
    }

    async fn verify(&self, record: &PaymentRecord, correlation: &Correlation) -> Verdict {
        let Some(pidx) = correlation.token.as_deref().or(record.gateway_token.as_deref()) else {
            return Verdict::Unverifiable {
                reason: "no pidx to look up".to_string(),
            };
        };

        let resp = self
            .client
            .post(&self.config.lookup_url)
            .header("Authorization", self.authorization())
            .json(&json!({ "pidx": pidx }))
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return transport_verdict(e),
        };
        if !resp.status().is_success() {
            return Verdict::Unverifiable {
                reason: format!("lookup endpoint returned HTTP {}", resp.status().as_u16()),
            };
        }
        let body: LookupResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                return Verdict::Unverifiable {
                    reason: format!("unparseable lookup response: {}", e),
                }
            }
        };
        let Some(raw_status) = body.status else {
            return Verdict::Unverifiable {
                reason: "lookup response has no status".to_string(),
            };
        };

        // Khalti reports paisa
        let reported = body
            .total_amount
            .as_ref()
            .and_then(json_scalar)
            .map(|paisa| match paisa.trim().parse::<i64>() {
                Ok(minor) => to_display_string(from_minor_units(minor)),
                Err(_) => paisa,
            });

        verdict_from_report(
            map_khalti_status(&raw_status),
            &raw_status,
            record.amount,
            reported,
            body.transaction_id
                .or_else(|| correlation.gateway_transaction_id.clone()),
        )
    }

    fn decode_callback(
        &self,
        params: &CallbackParams,
        session: &SessionValues,
    ) -> Result<Correlation, PaymentError> {
        let from_session = |key: &str| {
            session
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let pidx = params
            .get("pidx")
            .or_else(|| from_session(keys::KHALTI_PIDX))
            .ok_or_else(|| PaymentError::MalformedCallback("missing pidx".into()))?;

        let application_id = params
            .get("merchant_application_id")
            .and_then(|v| v.parse::<i64>().ok())
            .or_else(|| params.get("purchase_order_id").and_then(application_id_from_order))
            .or_else(|| from_session(keys::KHALTI_APPLICATION_ID).and_then(|v| v.parse().ok()))
            .ok_or_else(|| PaymentError::MalformedCallback("cannot resolve application".into()))?;

        Ok(Correlation {
            key: RecordKey::Application(application_id),
            token: Some(pidx.to_string()),
            gateway_transaction_id: params
                .first_of(&["transaction_id", "txnId", "tidx"])
                .map(ToString::to_string),
        })
    }

    fn decode_failure(&self, params: &CallbackParams, session: &SessionValues) -> Option<Correlation> {
        self.decode_callback(params, session).ok()
    }

    fn failure_status(&self) -> PaymentStatus {
        PaymentStatus::Canceled
    }

    fn issues_token(&self) -> bool {
        true
    }

    fn session_keys(&self) -> &'static [&'static str] {
        &keys::KHALTI_ALL
    }
}
