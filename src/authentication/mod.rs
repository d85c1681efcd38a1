mod extract;

pub const API_TOKEN_HEADER: &str = "x-api-token";

pub const PAYMENTS_CREATE: &str = "payments_create";
pub const PAYMENTS_DELETE: &str = "payments_delete";
pub const PAYMENTS_READ_ALL: &str = "payments_read_all";

/// The caller behind the request's API token.
#[derive(Clone, Debug)]
pub struct Actor {
    pub user_id: i64,
    capabilities: Vec<String>,
}

/// Every variant reads as `Unauthorized` so callers cannot tell which check
/// failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Unauthorized")]
    NotOwner,
    #[error("Unauthorized")]
    MissingCapability(&'static str),
}

impl Actor {
    pub fn new(user_id: i64, capabilities: Vec<String>) -> Self {
        Self {
            user_id,
            capabilities,
        }
    }

    pub fn can(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn require(&self, capability: &'static str) -> Result<(), AuthorizationError> {
        if self.can(capability) {
            Ok(())
        } else {
            tracing::info!("User `{}` lacks `{capability}`", self.user_id);
            Err(AuthorizationError::MissingCapability(capability))
        }
    }

    /// Passes for the owner of the resource or anyone holding `capability`.
    pub fn require_owner_or(
        &self,
        owner_id: i64,
        capability: &'static str,
    ) -> Result<(), AuthorizationError> {
        if self.user_id == owner_id || self.can(capability) {
            Ok(())
        } else {
            tracing::info!(
                "User `{}` neither owns the resource nor holds `{capability}`",
                self.user_id
            );
            Err(AuthorizationError::NotOwner)
        }
    }
}
