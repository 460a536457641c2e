use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use thiserror::Error;

pub type SecretMap = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secret '{reference}' is not a JSON object of strings: {message}")]
    Malformed { reference: String, message: String },

    #[error("secret provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_secret(&self, reference: &str) -> Result<SecretMap, CredentialError>;
}

/// Serves the secret from environment variables; `reference` names the field to read.
///
/// The field name is upper-cased to find the variable, so `grafana_api_key` reads
/// `GRAFANA_API_KEY`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn get_secret(&self, reference: &str) -> Result<SecretMap, CredentialError> {
        let var = reference.to_ascii_uppercase();
        let value = env::var(&var).map_err(|_| CredentialError::NotFound(var.clone()))?;
        Ok(HashMap::from([(reference.to_string(), value)]))
    }
}

pub fn parse_secret_string(reference: &str, raw: &str) -> Result<SecretMap, CredentialError> {
    serde_json::from_str(raw).map_err(|err| CredentialError::Malformed {
        reference: reference.to_string(),
        message: err.to_string(),
    })
}

pub fn require_field<'a>(
    secret: &'a SecretMap,
    reference: &str,
    field: &str,
) -> Result<&'a str, CredentialError> {
    secret
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| CredentialError::NotFound(format!("{reference}#{field}")))
}

#[cfg(feature = "runtime")]
pub use aws::SecretsManagerProvider;

#[cfg(feature = "runtime")]
mod aws {
    use async_trait::async_trait;
    use aws_config::BehaviorVersion;

    use super::{parse_secret_string, CredentialError, CredentialProvider, SecretMap};

    /// Reads JSON secret strings from AWS Secrets Manager.
    #[derive(Debug, Clone)]
    pub struct SecretsManagerProvider {
        client: aws_sdk_secretsmanager::Client,
    }

    impl SecretsManagerProvider {
        pub async fn from_env() -> Self {
            let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
            Self {
                client: aws_sdk_secretsmanager::Client::new(&shared),
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for SecretsManagerProvider {
        async fn get_secret(&self, reference: &str) -> Result<SecretMap, CredentialError> {
            let output = self
                .client
                .get_secret_value()
                .secret_id(reference)
                .send()
                .await
                .map_err(|err| CredentialError::Provider(err.to_string()))?;
            let raw = output
                .secret_string()
                .ok_or_else(|| CredentialError::NotFound(reference.to_string()))?;
            parse_secret_string(reference, raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_must_be_flat_object() {
        let secret = parse_secret_string("arn", r#"{"grafana_api_key":"abc"}"#).unwrap();
        assert_eq!(require_field(&secret, "arn", "grafana_api_key").unwrap(), "abc");
        assert!(require_field(&secret, "arn", "other").is_err());
        assert!(parse_secret_string("arn", "[1,2]").is_err());
    }
}
