use crate::{
    authentication::{Actor, PAYMENTS_READ_ALL},
    context::BillingContext,
    lifecycle::LifecycleError,
    pricing::{self, UsageQuote},
    routes::ApiResponse,
};
use axum::extract::{rejection::PathRejection, Path, State};
use std::sync::Arc;

/// Current usage bill for `user_id`; `null` when there is nothing to charge.
#[tracing::instrument(skip(billing, actor, path), fields(actor_id = actor.user_id))]
pub(super) async fn usage_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResponse<Option<UsageQuote>> {
    let Path(user_id) = match path {
        Ok(path) => path,
        Err(rejection) => return rejection.into(),
    };

    if let Err(e) = actor.require_owner_or(user_id, PAYMENTS_READ_ALL) {
        return LifecycleError::from(e).into();
    }

    ApiResponse::Success(pricing::usage_quote(&billing, user_id).await)
}
