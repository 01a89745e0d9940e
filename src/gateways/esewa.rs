use crate::codec::signature;
use crate::config::EsewaConfig;
use crate::domain::callback::{CallbackParams, Correlation, RecordKey};
use crate::domain::payment::{PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::PaymentError;
use crate::gateways::{
    json_scalar, transport_verdict, verdict_from_report, AttemptContext, GatewayAdapter,
    InitiationPayload,
};
use crate::codec::amount::to_display_string;
use crate::reconcile::engine::Verdict;
use crate::session::SessionValues;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Fields eSewa signs at initiation, in its documented order.
const SIGNED_FIELD_NAMES: &str = "total_amount,transaction_uuid,product_code";

pub fn map_esewa_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "COMPLETE" => PaymentStatus::Complete,
        "PENDING" | "AMBIGUOUS" => PaymentStatus::Pending,
        "CANCELED" => PaymentStatus::Canceled,
        // NOT_FOUND, FULL_REFUND, PARTIAL_REFUND and anything new
        _ => PaymentStatus::Failed,
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_amount: Option<Value>,
    #[serde(default)]
    ref_id: Option<String>,
}

pub struct EsewaGateway {
    config: EsewaConfig,
    client: reqwest::Client,
}

impl EsewaGateway {
    pub fn new(mut config: EsewaConfig, client: reqwest::Client) -> Self {
        config.secret_key = config.secret_key.trim().to_string();
        config.product_code = config.product_code.trim().to_string();
        Self { config, client }
    }

    /// Decodes the `data` redirect parameter into its JSON object.
    pub fn decode_data(&self, data: &str) -> Result<Map<String, Value>, PaymentError> {
        // query decoding turns an unescaped '+' into a space
        let normalized = data.trim().replace(' ', "+");
        let bytes = STANDARD
            .decode(normalized.as_bytes())
            .map_err(|e| PaymentError::MalformedCallback(format!("data is not base64: {}", e)))?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PaymentError::MalformedCallback("data is not a JSON object".into())),
            Err(e) => Err(PaymentError::MalformedCallback(format!("data is not JSON: {}", e))),
        }
    }

    /// Checks the response signature when eSewa included one.
    fn check_signature(&self, payload: &Map<String, Value>) -> Result<(), PaymentError> {
        let names = payload.get("signed_field_names").and_then(Value::as_str);
        let provided = payload.get("signature").and_then(Value::as_str);
        let (Some(names), Some(provided)) = (names, provided) else {
            return Ok(());
        };

        let mut values = Vec::new();
        for name in names.split(',').map(str::trim) {
            let value = payload
                .get(name)
                .and_then(json_scalar)
                .ok_or_else(|| PaymentError::MalformedCallback(format!("signed field {} missing", name)))?;
            values.push((name, value));
        }
        let fields: Vec<(&str, &str)> = values.iter().map(|(n, v)| (*n, v.as_str())).collect();

        if signature::verify(&self.config.secret_key, &fields, provided) {
            Ok(())
        } else {
            Err(PaymentError::MalformedCallback("callback signature mismatch".into()))
        }
    }
}

#[async_trait::async_trait]
impl GatewayAdapter for EsewaGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Esewa
    }

    fn product_code(&self) -> &str {
        &self.config.product_code
    }

    fn new_reference(&self, _application_id: i64) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn map_status(&self, external: &str) -> PaymentStatus {
        map_esewa_status(external)
    }

    async fn initiate(&self, ctx: &AttemptContext<'_>) -> Result<InitiationPayload, PaymentError> {
        let total_amount = ctx.amount_display();
        let reference = ctx.record.transaction_reference.as_str();
        let product_code = ctx.record.product_code.as_str();

        let signature = signature::sign(
            &self.config.secret_key,
            &[
                ("total_amount", total_amount.as_str()),
                ("transaction_uuid", reference),
                ("product_code", product_code),
            ],
        );

        let fields = [
            ("amount", total_amount.as_str()),
            ("tax_amount", "0"),
            ("total_amount", total_amount.as_str()),
            ("transaction_uuid", reference),
            ("product_code", product_code),
            ("product_service_charge", "0"),
            ("product_delivery_charge", "0"),
            ("success_url", ctx.success_url.as_str()),
            ("failure_url", ctx.failure_url.as_str()),
            ("signed_field_names", SIGNED_FIELD_NAMES),
            ("signature", signature.as_str()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Ok(InitiationPayload::Form {
            action: self.config.form_url.clone(),
            fields,
        })
    }

    async fn verify(&self, record: &PaymentRecord, correlation: &Correlation) -> Verdict {
        let expected = to_display_string(record.amount);
        let resp = self
            .client
            .get(&self.config.status_url)
            .query(&[
                ("product_code", record.product_code.as_str()),
                ("total_amount", expected.as_str()),
                ("transaction_uuid", record.transaction_reference.as_str()),
            ])
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return transport_verdict(e),
        };
        if !resp.status().is_success() {
            return Verdict::Unverifiable {
                reason: format!("status endpoint returned HTTP {}", resp.status().as_u16()),
            };
        }
        let body: StatusResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                return Verdict::Unverifiable {
                    reason: format!("unparseable status response: {}", e),
                }
            }
        };
        let Some(raw_status) = body.status else {
            return Verdict::Unverifiable {
                reason: "status response has no status".to_string(),
            };
        };

        verdict_from_report(
            map_esewa_status(&raw_status),
            &raw_status,
            record.amount,
            body.total_amount.as_ref().and_then(json_scalar),
            // the server-confirmed ref_id wins over the browser-supplied code
            body.ref_id
                .filter(|r| !r.trim().is_empty())
                .or_else(|| correlation.gateway_transaction_id.clone()),
        )
    }

    fn decode_callback(
        &self,
        params: &CallbackParams,
        _session: &SessionValues,
    ) -> Result<Correlation, PaymentError> {
        let data = params
            .get("data")
            .ok_or_else(|| PaymentError::MalformedCallback("missing data parameter".into()))?;
        let payload = self.decode_data(data)?;
        self.check_signature(&payload)?;

        let reference = payload
            .get("transaction_uuid")
            .and_then(json_scalar)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::MalformedCallback("missing transaction_uuid".into()))?;

        Ok(Correlation {
            key: RecordKey::Reference(reference),
            token: None,
            gateway_transaction_id: payload.get("transaction_code").and_then(json_scalar),
        })
    }

    fn decode_failure(&self, params: &CallbackParams, _session: &SessionValues) -> Option<Correlation> {
        let payload = match self.decode_data(params.get("data")?) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("esewa failure redirect carried undecodable data: {}", e);
                return None;
            }
        };
        let reference = payload.get("transaction_uuid").and_then(json_scalar)?;
        Some(Correlation {
            key: RecordKey::Reference(reference),
            token: None,
            gateway_transaction_id: None,
        })
    }

    fn failure_status(&self) -> PaymentStatus {
        PaymentStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> EsewaGateway {
        EsewaGateway::new(
            EsewaConfig {
                secret_key: " secret ".to_string(),
                product_code: "EPAYTEST".to_string(),
                form_url: "https://esewa.test/form".to_string(),
                status_url: "https://esewa.test/status".to_string(),
                timeout_ms: 1000,
            },
            reqwest::Client::new(),
        )
    }

    fn encode(v: Value) -> String {
        STANDARD.encode(v.to_string())
    }

    #[test]
    fn status_table_fails_closed() {
        assert_eq!(map_esewa_status("COMPLETE"), PaymentStatus::Complete);
        assert_eq!(map_esewa_status("complete"), PaymentStatus::Complete);
        assert_eq!(map_esewa_status("AMBIGUOUS"), PaymentStatus::Pending);
        assert_eq!(map_esewa_status("FULL_REFUND"), PaymentStatus::Failed);
        assert_eq!(map_esewa_status("Completed!"), PaymentStatus::Failed);
        assert_eq!(map_esewa_status(""), PaymentStatus::Failed);
    }

    #[test]
    fn decodes_reference_and_transaction_code() {
        let data = encode(serde_json::json!({
            "transaction_code": "000AE01",
            "status": "COMPLETE",
            "total_amount": "1000.0",
            "transaction_uuid": "abc123",
            "product_code": "EPAYTEST",
        }));
        let params = CallbackParams::from([("data", data.as_str())]);
        let c = gateway().decode_callback(&params, &SessionValues::new()).unwrap();
        assert_eq!(c.key, RecordKey::Reference("abc123".to_string()));
        assert_eq!(c.gateway_transaction_id.as_deref(), Some("000AE01"));
    }

    #[test]
    fn validates_signature_when_present() {
        let names = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
        let good = signature::sign(
            "secret",
            &[
                ("transaction_code", "000AE01"),
                ("status", "COMPLETE"),
                ("total_amount", "1000.0"),
                ("transaction_uuid", "abc123"),
                ("product_code", "EPAYTEST"),
                ("signed_field_names", names),
            ],
        );
        let body = |sig: &str| {
            encode(serde_json::json!({
                "transaction_code": "000AE01",
                "status": "COMPLETE",
                "total_amount": "1000.0",
                "transaction_uuid": "abc123",
                "product_code": "EPAYTEST",
                "signed_field_names": names,
                "signature": sig,
            }))
        };

        let ok = body(&good);
        let params = CallbackParams::from([("data", ok.as_str())]);
        assert!(gateway().decode_callback(&params, &SessionValues::new()).is_ok());

        let forged = body("AAAA");
        let params = CallbackParams::from([("data", forged.as_str())]);
        assert!(matches!(
            gateway().decode_callback(&params, &SessionValues::new()),
            Err(PaymentError::MalformedCallback(_))
        ));
    }

    #[test]
    fn garbage_data_is_malformed() {
        for data in ["%%%not-base64", "bm90IGpzb24="] {
            let params = CallbackParams::from([("data", data)]);
            assert!(matches!(
                gateway().decode_callback(&params, &SessionValues::new()),
                Err(PaymentError::MalformedCallback(_))
            ));
        }
        assert!(matches!(
            gateway().decode_callback(&CallbackParams::default(), &SessionValues::new()),
            Err(PaymentError::MalformedCallback(_))
        ));
    }

    #[test]
    fn failure_without_data_changes_nothing() {
        assert!(gateway()
            .decode_failure(&CallbackParams::default(), &SessionValues::new())
            .is_none());
    }
}
