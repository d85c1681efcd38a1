use super::{Actor, API_TOKEN_HEADER};
use crate::{app_state::AppState, routes::ApiResponse};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use secrecy::Secret;

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ApiResponse<()>;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = parts
            .headers
            .get(API_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
        else {
            tracing::info!("Request carries no API token");
            return Err(ApiResponse::unauthorized());
        };

        match state
            .billing
            .directory
            .resolve_token(&Secret::new(token.to_string()))
            .await
        {
            Ok(Some(user)) => {
                tracing::info!("Request authenticated as user `{}`", user.user_id);
                Ok(Actor::new(user.user_id, user.capabilities))
            }
            Ok(None) => Err(ApiResponse::unauthorized()),
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to resolve API token"
                );
                Err(ApiResponse::error("Failed to verify API token"))
            }
        }
    }
}
