//! Client for the user-management API that owns accounts, teams and
//! capabilities.

use crate::domain::{ActivationFlags, EmailAddress};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Deserialize};
use serde_aux::field_attributes::deserialize_bool_from_anything;
use std::time::Duration;

const API_TOKEN_HEADER: &str = "x-api-token";

#[derive(Clone)]
pub struct DirectoryClient {
    http_client: Client,
    base_url: String,
    master_token: Secret<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DirectoryUser {
    pub user_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_from_anything")]
    pub active: bool,
    #[serde(default)]
    pub api_token: Option<Secret<String>>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl DirectoryUser {
    /// The stored address, if present and well-formed.
    pub fn email(&self) -> Option<EmailAddress> {
        self.email
            .clone()
            .and_then(|email| EmailAddress::parse(email).ok())
    }

    pub fn can(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("User directory request failed")]
    Request(#[from] reqwest::Error),
    #[error("User directory rejected the request: {0}")]
    Rejected(String),
    #[error("User directory returned an unreadable response")]
    Malformed(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TeamMember {
    user_id: i64,
}

impl DirectoryClient {
    pub fn new(
        base_url: String,
        master_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            master_token,
        })
    }

    #[tracing::instrument(name = "Fetch user from directory", skip(self))]
    pub async fn get_user(&self, user_id: i64) -> Result<DirectoryUser, DirectoryError> {
        let request = self
            .http_client
            .get(format!("{}/users/{user_id}", self.base_url));

        self.send(request, &self.master_token).await
    }

    /// Resolves the caller behind an API token. `None` when the directory
    /// does not recognise the token.
    #[tracing::instrument(name = "Resolve API token", skip_all)]
    pub async fn resolve_token(
        &self,
        token: &Secret<String>,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let request = self.http_client.get(format!("{}/users/me", self.base_url));

        match self.send(request, token).await {
            Ok(user) => Ok(Some(user)),
            Err(DirectoryError::Rejected(reason)) => {
                tracing::info!("API token was not accepted: {reason}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(name = "List team members", skip(self))]
    pub async fn list_team_members(&self, team_id: i64) -> Result<Vec<i64>, DirectoryError> {
        let request = self
            .http_client
            .get(format!("{}/users", self.base_url))
            .query(&[("team_id", team_id)]);

        let members: Vec<TeamMember> = self.send(request, &self.master_token).await?;
        Ok(members.into_iter().map(|member| member.user_id).collect())
    }

    #[tracing::instrument(name = "Set user activation", skip(self))]
    pub async fn set_user_activation(
        &self,
        user_id: i64,
        flags: ActivationFlags,
    ) -> Result<(), DirectoryError> {
        let request = self
            .http_client
            .put(format!("{}/users/{user_id}", self.base_url))
            .json(&flags);

        let _: serde_json::Value = self.send(request, &self.master_token).await?;
        Ok(())
    }

    async fn send<T>(
        &self,
        request: RequestBuilder,
        token: &Secret<String>,
    ) -> Result<T, DirectoryError>
    where
        T: DeserializeOwned,
    {
        let body = request
            .header(API_TOKEN_HEADER, token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_envelope(&body)
    }
}

/// Some directory endpoints emit noise ahead of the JSON document, so
/// everything before the first `{` is dropped.
fn parse_envelope<T>(body: &str) -> Result<T, DirectoryError>
where
    T: DeserializeOwned,
{
    let json = body.find('{').map_or(body, |start| &body[start..]);
    let envelope: Envelope<T> = serde_json::from_str(json).map_err(DirectoryError::Malformed)?;

    if envelope.success != "success" {
        let reason = envelope
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| envelope.success.clone());
        return Err(DirectoryError::Rejected(reason));
    }

    envelope
        .data
        .ok_or_else(|| DirectoryError::Rejected("response carried no data".into()))
}
