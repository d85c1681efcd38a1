use crate::{
    context::BillingContext,
    domain::{TierQuote, UsageTierSchedule},
};
use serde::Serialize;

/// Current bill for a user's usage-metered add-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageQuote {
    pub id: i64,
    pub user_id: i64,
    #[serde(flatten)]
    pub quote: TierQuote,
}

/// Prices the user's live usage. `None` means "do not charge": no usage
/// subscription, unknown or inactive user, no API token, zero usage, usage
/// too large to price, or any lookup failure.
#[tracing::instrument(name = "Quote usage subscription", skip(billing))]
pub async fn usage_quote(billing: &BillingContext, user_id: i64) -> Option<UsageQuote> {
    let usage_subscription = match billing.store.find_usage_subscription(user_id).await {
        Ok(Some(usage_subscription)) => usage_subscription,
        Ok(None) => {
            tracing::debug!("User has no usage subscription");
            return None;
        }
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "Failed to fetch usage subscription");
            return None;
        }
    };

    let user = match billing.directory.get_user(user_id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "User not found");
            return None;
        }
    };

    let Some(api_token) = user.api_token.as_ref() else {
        tracing::warn!("User does not have an API token set");
        return None;
    };

    if !user.active {
        tracing::info!("User is not active, nothing to charge");
        return None;
    }

    let schedule = match UsageTierSchedule::new(
        usage_subscription.base_contacts,
        usage_subscription.contacts_per_tier,
        usage_subscription.price_per_tier,
    ) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!("Usage subscription is misconfigured: {e}");
            return None;
        }
    };

    let count = match billing.usage.clients_count(api_token).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "Failed to fetch clients count");
            return None;
        }
    };

    let quote = match schedule.quote(count) {
        Ok(Some(quote)) => quote,
        Ok(None) => {
            tracing::info!("User has no clients, nothing to charge");
            return None;
        }
        Err(e) => {
            tracing::error!(count, "Usage cannot be priced, nothing to charge: {e}");
            return None;
        }
    };

    Some(UsageQuote {
        id: usage_subscription.usage_subscription_id,
        user_id: usage_subscription.user_id,
        quote,
    })
}
