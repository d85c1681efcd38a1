use crate::{
    directory_client::DirectoryClient,
    domain::EmailAddress,
    email_client::EmailClient,
    payment_client::PaymentClient,
    usage_client::UsageClient,
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};
use std::time::Duration;
use tracing_log::log::LevelFilter;

#[derive(Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub payments: PaymentSettings,
    pub directory: DirectorySettings,
    pub usage_api: UsageApiSettings,
    pub renewal_worker: RenewalWorkerSettings,
}

#[derive(Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub frontend_url: String,
    admin_email: String,
    operations_email: String,
}

impl ApplicationSettings {
    pub fn admin_email(&self) -> Result<EmailAddress, String> {
        EmailAddress::parse(self.admin_email.clone())
    }

    pub fn operations_email(&self) -> Result<EmailAddress, String> {
        EmailAddress::parse(self.operations_email.clone())
    }
}

#[derive(Clone, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db()
            .database(&self.database_name)
            .log_statements(LevelFilter::Trace)
    }

    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .ssl_mode(ssl_mode)
    }
}

#[derive(Clone, Deserialize)]
pub struct EmailClientSettings {
    pub base_url: String,
    sender_email: String,
    pub authorization_token: Secret<String>,
    pub timeout_milliseconds: u64,
    pub enabled: bool,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<EmailAddress, String> {
        EmailAddress::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn client(&self) -> Result<EmailClient, anyhow::Error> {
        let sender = self.sender().map_err(anyhow::Error::msg)?;
        let client = EmailClient::new(
            self.base_url.clone(),
            sender,
            self.authorization_token.clone(),
            self.timeout(),
        )?;

        Ok(client)
    }
}

#[derive(Clone, Deserialize)]
pub struct PaymentSettings {
    pub base_url: String,
    pub access_token: Secret<String>,
    pub timeout_milliseconds: u64,
}

impl PaymentSettings {
    pub fn client(&self) -> Result<PaymentClient, reqwest::Error> {
        PaymentClient::new(
            self.base_url.clone(),
            self.access_token.clone(),
            Duration::from_millis(self.timeout_milliseconds),
        )
    }
}

#[derive(Clone, Deserialize)]
pub struct DirectorySettings {
    pub base_url: String,
    pub master_token: Secret<String>,
    pub timeout_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_concurrent_requests: usize,
}

impl DirectorySettings {
    pub fn client(&self) -> Result<DirectoryClient, reqwest::Error> {
        DirectoryClient::new(
            self.base_url.clone(),
            self.master_token.clone(),
            Duration::from_millis(self.timeout_milliseconds),
        )
    }
}

#[derive(Clone, Deserialize)]
pub struct UsageApiSettings {
    pub base_url: String,
    pub timeout_milliseconds: u64,
}

impl UsageApiSettings {
    pub fn client(&self) -> Result<UsageClient, reqwest::Error> {
        UsageClient::new(
            self.base_url.clone(),
            Duration::from_millis(self.timeout_milliseconds),
        )
    }
}

#[derive(Clone, Deserialize)]
pub struct RenewalWorkerSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub poll_interval_seconds: u64,
}

impl RenewalWorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let config_dir = std::env::current_dir()
        .map(|dir| dir.join("configuration"))
        .map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let env_config = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_dir.join("base.yaml")))
        .add_source(config::File::from(config_dir.join(env_config)))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "`{other}` is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}
