use std::collections::HashMap;

/// Raw query parameters from a gateway redirect. Untrusted.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams(pub HashMap<String, String>);

impl CallbackParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for CallbackParams {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// How a callback names the attempt it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Reference(String),
    Application(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub key: RecordKey,
    /// Provider session token (`pidx`), when the provider issues one.
    pub token: Option<String>,
    pub gateway_transaction_id: Option<String>,
}
