//! Config redaction: safe-to-print snapshots with secrets masked.

use serde_json::Value;

use crate::schema::IcyConfig;

const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret"];

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// JSON view of the config with every sensitive field replaced by `"***"`.
pub fn redact(config: &IcyConfig) -> Value {
    match serde_json::to_value(config) {
        Ok(value) => redact_value(&value, ""),
        Err(_) => Value::Null,
    }
}

fn redact_value(value: &Value, key: &str) -> Value {
    match value {
        Value::String(s) if is_sensitive_key(key) && !s.is_empty() => Value::String("***".into()),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, key)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, k)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RepositoryConfig;

    #[test]
    fn masks_repository_password() {
        let cfg = IcyConfig {
            repositories: vec![RepositoryConfig {
                name: "lab".into(),
                location: "https://repo.lab/plugins.xml".into(),
                login: Some("lab".into()),
                password: Some("s3cr3t".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let redacted = redact(&cfg);
        assert_eq!(redacted["repositories"][0]["password"], "***");
        assert_eq!(redacted["repositories"][0]["login"], "lab");
        assert!(!redacted.to_string().contains("s3cr3t"));
    }
}
