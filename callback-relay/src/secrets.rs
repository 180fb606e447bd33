use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_secretsmanager::{config::Region, error::DisplayErrorContext};
use serde::de::{self, DeserializeOwned};
use serde_json::Value;

const DEFAULT_AWS_REGION: &str = "eu-north-1";

#[async_trait]
pub trait SecretRepository {
    async fn open() -> Self;

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError>;
}

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("secret store request for {name} failed: {description}")]
    Backend { name: String, description: String },
    #[error("secret {0} has no string value")]
    MissingSecret(String),
    #[error("secret {name} is not a valid JSON object: {source}")]
    Malformed {
        name: String,
        source: serde_json::Error,
    },
}

pub struct AwsSecretsManagerSecretRepository(aws_sdk_secretsmanager::Client);

#[async_trait]
impl SecretRepository for AwsSecretsManagerSecretRepository {
    async fn open() -> Self {
        let region =
            RegionProviderChain::default_provider().or_else(Region::new(DEFAULT_AWS_REGION));
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Ok(url) = std::env::var("AWS_ENDPOINT_URL") {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&config);
        Self(secrets_client)
    }

    async fn get_secret<T: DeserializeOwned>(&self, name: &str) -> Result<T, SecretError> {
        let secret = self
            .0
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|error| SecretError::Backend {
                name: name.into(),
                description: DisplayErrorContext(error).to_string(),
            })?;
        let Some(secret_value) = secret.secret_string() else {
            return Err(SecretError::MissingSecret(name.into()));
        };
        parse_secret(name, secret_value)
    }
}

/// Secrets hold a flat JSON object; arrays and scalars are rejected before mapping.
fn parse_secret<T: DeserializeOwned>(name: &str, secret_value: &str) -> Result<T, SecretError> {
    let malformed = |source| SecretError::Malformed {
        name: name.into(),
        source,
    };
    let value: Value = serde_json::from_str(secret_value).map_err(malformed)?;
    if !value.is_object() {
        return Err(malformed(de::Error::custom("expected a JSON object")));
    }
    serde_json::from_value(value).map_err(malformed)
}
