use crate::secrets::{AwsSecretsManagerSecretRepository, SecretError, SecretRepository};
use axum::http::HeaderValue;
use lettre::message::Mailbox;
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use std::{fmt::Display, num::NonZeroU32, str::FromStr, time::Duration};
use tracing::info;

pub const SECRET_NAME_VARIABLE: &str = "DELIVERY_SECRET_NAME";

const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_LISTEN_PORT: u16 = 5000;
const DEFAULT_RATE_LIMIT_MAX: u32 = 200;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60 * 60;
const SENDER_DISPLAY_NAME: &str = "Website Callback";

/// Everything the service needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` when no SMTP host is configured; callbacks then fail as not ready.
    pub relay: Option<RelayConfig>,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub credentials: Option<SmtpCredentials>,
    pub sender: Mailbox,
    pub receiver: Mailbox,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub port: u16,
    pub allowed_origin: HeaderValue,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: NonZeroU32::MIN.saturating_add(DEFAULT_RATE_LIMIT_MAX - 1),
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load delivery configuration from the secret store: {0}")]
    Secret(#[from] SecretError),
    #[error("could not read environment: {0}")]
    Environment(serde_json::Error),
    #[error("{key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when SMTP_HOST is configured")]
    Missing(&'static str),
}

/// Configuration values as found in the environment or the remote secret, before
/// validation. Keys use the environment variable names.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawSettings {
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_host: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_port: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_secure: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_user: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_pass: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_from: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_timeout_secs: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub contact_receiver_email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub frontend_origin: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub port: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub rate_limit_max: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub rate_limit_window_secs: Option<String>,
}

impl RawSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let variables = std::env::vars_os()
            .filter_map(|(key, value)| {
                Some((key.into_string().ok()?, Value::String(value.into_string().ok()?)))
            })
            .collect();
        serde_json::from_value(Value::Object(variables)).map_err(ConfigError::Environment)
    }

    /// Takes each value from `self`, falling back to `fallback` where it is unset.
    pub fn or(self, fallback: RawSettings) -> RawSettings {
        RawSettings {
            smtp_host: self.smtp_host.or(fallback.smtp_host),
            smtp_port: self.smtp_port.or(fallback.smtp_port),
            smtp_secure: self.smtp_secure.or(fallback.smtp_secure),
            smtp_user: self.smtp_user.or(fallback.smtp_user),
            smtp_pass: self.smtp_pass.or(fallback.smtp_pass),
            smtp_from: self.smtp_from.or(fallback.smtp_from),
            smtp_timeout_secs: self.smtp_timeout_secs.or(fallback.smtp_timeout_secs),
            contact_receiver_email: self
                .contact_receiver_email
                .or(fallback.contact_receiver_email),
            frontend_origin: self.frontend_origin.or(fallback.frontend_origin),
            port: self.port.or(fallback.port),
            rate_limit_max: self.rate_limit_max.or(fallback.rate_limit_max),
            rate_limit_window_secs: self
                .rate_limit_window_secs
                .or(fallback.rate_limit_window_secs),
        }
    }
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let relay = match non_blank(raw.smtp_host) {
            Some(host) => Some(RelayConfig {
                host,
                port: parse_or("SMTP_PORT", raw.smtp_port, DEFAULT_SMTP_PORT)?,
                secure: parse_flag("SMTP_SECURE", raw.smtp_secure)?,
                credentials: match (non_blank(raw.smtp_user.clone()), raw.smtp_pass) {
                    (Some(username), Some(password)) if !password.is_empty() => {
                        Some(SmtpCredentials { username, password })
                    }
                    _ => None,
                },
                sender: parse_sender(non_blank(raw.smtp_from).or(non_blank(raw.smtp_user)))?,
                receiver: parse_mailbox(
                    "CONTACT_RECEIVER_EMAIL",
                    non_blank(raw.contact_receiver_email)
                        .ok_or(ConfigError::Missing("CONTACT_RECEIVER_EMAIL"))?,
                )?,
                timeout: Duration::from_secs(parse_positive(
                    "SMTP_TIMEOUT_SECS",
                    raw.smtp_timeout_secs,
                    DEFAULT_SMTP_TIMEOUT_SECS,
                )?),
            }),
            None => None,
        };

        let origin = non_blank(raw.frontend_origin).unwrap_or(DEFAULT_ALLOWED_ORIGIN.into());
        let allowed_origin =
            HeaderValue::from_str(&origin).map_err(|error| ConfigError::InvalidValue {
                key: "FRONTEND_ORIGIN",
                value: origin.clone(),
                reason: error.to_string(),
            })?;

        let max_requests =
            parse_or("RATE_LIMIT_MAX", raw.rate_limit_max, DEFAULT_RATE_LIMIT_MAX)?;
        let rate_limit = RateLimitSettings {
            max_requests: NonZeroU32::new(max_requests).ok_or(ConfigError::InvalidValue {
                key: "RATE_LIMIT_MAX",
                value: max_requests.to_string(),
                reason: "must be at least 1".into(),
            })?,
            window: Duration::from_secs(parse_positive(
                "RATE_LIMIT_WINDOW_SECS",
                raw.rate_limit_window_secs,
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )?),
        };

        Ok(Settings {
            relay,
            http: HttpSettings {
                port: parse_or("PORT", raw.port, DEFAULT_LISTEN_PORT)?,
                allowed_origin,
                rate_limit,
            },
        })
    }
}

/// Loads the configuration from the environment and, when [`SECRET_NAME_VARIABLE`] is
/// set, from AWS Secrets Manager. Any failure here is fatal to startup.
pub async fn load_settings() -> Result<Settings, ConfigError> {
    let environment = RawSettings::from_env()?;
    let raw = match std::env::var(SECRET_NAME_VARIABLE) {
        Ok(secret_name) => {
            info!("Loading delivery configuration from secret {secret_name}");
            let repository = AwsSecretsManagerSecretRepository::open().await;
            load_from_secret(&repository, &secret_name, environment).await?
        }
        Err(_) => environment,
    };
    Settings::try_from(raw)
}

/// Values in the secret take precedence over the environment.
pub async fn load_from_secret<SecretRepositoryT: SecretRepository>(
    repository: &SecretRepositoryT,
    secret_name: &str,
    environment: RawSettings,
) -> Result<RawSettings, ConfigError> {
    let remote: RawSettings = repository.get_secret(secret_name).await?;
    Ok(remote.or(environment))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<T: FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    match non_blank(value) {
        Some(value) => value.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
            key,
            reason: error.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn parse_positive(
    key: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<u64, ConfigError> {
    match parse_or(key, value, default)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: "0".into(),
            reason: "must be at least 1".into(),
        }),
        parsed => Ok(parsed),
    }
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = non_blank(value) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true or false".into(),
        }),
    }
}

fn parse_mailbox(key: &'static str, value: String) -> Result<Mailbox, ConfigError> {
    value.parse().map_err(|error: lettre::address::AddressError| ConfigError::InvalidValue {
        key,
        reason: error.to_string(),
        value,
    })
}

fn parse_sender(value: Option<String>) -> Result<Mailbox, ConfigError> {
    let value = value.ok_or(ConfigError::Missing("SMTP_FROM or SMTP_USER"))?;
    let mailbox = parse_mailbox("SMTP_FROM", value)?;
    Ok(match mailbox.name {
        Some(_) => mailbox,
        None => Mailbox::new(Some(SENDER_DISPLAY_NAME.into()), mailbox.email),
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value),
        Some(Value::Number(value)) => Some(value.to_string()),
        Some(Value::Bool(value)) => Some(value.to_string()),
        Some(other) => {
            return Err(de::Error::custom(format!(
                "expected a string, number or boolean, found {other}"
            )))
        }
    })
}
