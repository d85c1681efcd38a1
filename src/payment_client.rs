use reqwest::{Client, Error};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status the payments API reports for a settled charge.
pub const COMPLETED: &str = "COMPLETED";

#[derive(Clone)]
pub struct PaymentClient {
    http_client: Client,
    base_url: String,
    access_token: Secret<String>,
}

#[derive(Debug, Serialize)]
pub struct ChargeRequest<'a> {
    pub amount: i64,
    pub user_id: i64,
    pub memo: &'a str,
    pub product_id: Option<&'a str>,
}

/// Result of a charge attempt that reached the payments API.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub status: String,
    pub raw: serde_json::Value,
}

impl ChargeOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED
    }
}

#[derive(Deserialize)]
struct ChargeResponse {
    payment: Option<PaymentBody>,
}

#[derive(Deserialize)]
struct PaymentBody {
    status: Option<String>,
}

impl PaymentClient {
    pub fn new(
        base_url: String,
        access_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            access_token,
        })
    }

    #[tracing::instrument(name = "Charge a subscriber", skip(self, request), fields(user_id = request.user_id, amount = request.amount))]
    pub async fn charge(&self, request: &ChargeRequest<'_>) -> Result<ChargeOutcome, Error> {
        let url = format!("{}/payments", &self.base_url);

        let raw: serde_json::Value = self
            .http_client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let status = serde_json::from_value::<ChargeResponse>(raw.clone())
            .ok()
            .and_then(|response| response.payment)
            .and_then(|payment| payment.status)
            .unwrap_or_default();

        Ok(ChargeOutcome { status, raw })
    }
}
