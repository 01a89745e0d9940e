use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Joins fields as `name1=value1,name2=value2` in the order given.
pub fn canonical_string(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Base64 HMAC-SHA256 over the canonical field string, keyed with the trimmed secret.
pub fn sign(secret_key: &str, fields: &[(&str, &str)]) -> String {
    let mac = keyed(secret_key, fields);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time check of a base64 signature against the fields.
pub fn verify(secret_key: &str, fields: &[(&str, &str)], signature: &str) -> bool {
    let Ok(provided) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    keyed(secret_key, fields).verify_slice(&provided).is_ok()
}

fn keyed(secret_key: &str, fields: &[(&str, &str)]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret_key.trim().as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(canonical_string(fields).as_bytes());
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: [(&str, &str); 3] = [
        ("total_amount", "100"),
        ("transaction_uuid", "11-201-13"),
        ("product_code", "EPAYTEST"),
    ];

    #[test]
    fn canonical_string_keeps_caller_order() {
        assert_eq!(
            canonical_string(&FIELDS),
            "total_amount=100,transaction_uuid=11-201-13,product_code=EPAYTEST"
        );
    }

    #[test]
    fn deterministic_and_sensitive_to_every_input() {
        let base = sign("secret", &FIELDS);
        assert_eq!(base, sign("secret", &FIELDS));
        assert_ne!(base, sign("secret2", &FIELDS));

        let mut changed = FIELDS;
        changed[0] = ("total_amount", "101");
        assert_ne!(base, sign("secret", &changed));

        let reordered = [FIELDS[1], FIELDS[0], FIELDS[2]];
        assert_ne!(base, sign("secret", &reordered));
    }

    #[test]
    fn secret_is_trimmed() {
        assert_eq!(sign("  secret\n", &FIELDS), sign("secret", &FIELDS));
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(!verify("k", &FIELDS, "not base64!!"));
        assert!(!verify("k", &FIELDS, &sign("other", &FIELDS)));
        assert!(verify("k", &FIELDS, &sign("k", &FIELDS)));
    }
}
