use reqwest::{Client, Error};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

/// Reads live client counts from the usage-metered product's API.
#[derive(Clone)]
pub struct UsageClient {
    http_client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ClientsCount {
    #[serde(default)]
    count: Option<u64>,
}

impl UsageClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// A missing count is reported as zero.
    #[tracing::instrument(name = "Fetch clients count", skip_all)]
    pub async fn clients_count(&self, api_token: &Secret<String>) -> Result<u64, Error> {
        let response: ClientsCount = self
            .http_client
            .get(format!("{}/api/clients/count", self.base_url))
            .header("x-api-token", api_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.count.unwrap_or(0))
    }
}
