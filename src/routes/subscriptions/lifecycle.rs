use crate::{
    app_state::AppState,
    authentication::Actor,
    context::BillingContext,
    domain::DesiredStatus,
    lifecycle::{self, LifecycleError},
    routes::ApiResponse,
};
use axum::extract::{rejection::PathRejection, Path, State};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub(super) struct SubscriptionRef {
    subscription_id: Uuid,
}

type SubscriptionPath = Result<Path<Uuid>, PathRejection>;

#[tracing::instrument(skip(billing, actor, path), fields(user_id = actor.user_id))]
pub(super) async fn pause_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    path: SubscriptionPath,
) -> ApiResponse<SubscriptionRef> {
    let Path(subscription_id) = match path {
        Ok(path) => path,
        Err(rejection) => return rejection.into(),
    };

    toggle_authorized(&billing, &actor, subscription_id, DesiredStatus::Pause)
        .await
        .into()
}

#[tracing::instrument(skip(billing, actor, path), fields(user_id = actor.user_id))]
pub(super) async fn resume_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    path: SubscriptionPath,
) -> ApiResponse<SubscriptionRef> {
    let Path(subscription_id) = match path {
        Ok(path) => path,
        Err(rejection) => return rejection.into(),
    };

    toggle_authorized(&billing, &actor, subscription_id, DesiredStatus::Active)
        .await
        .into()
}

async fn toggle_authorized(
    billing: &BillingContext,
    actor: &Actor,
    subscription_id: Uuid,
    desired: DesiredStatus,
) -> Result<SubscriptionRef, LifecycleError> {
    lifecycle::find_authorized(billing, subscription_id, actor).await?;
    lifecycle::toggle_to(billing, subscription_id, desired).await?;

    Ok(SubscriptionRef { subscription_id })
}

#[tracing::instrument(skip(app_state, actor, path), fields(user_id = actor.user_id))]
pub(super) async fn cancel_subscription(
    State(app_state): State<AppState>,
    actor: Actor,
    path: SubscriptionPath,
) -> ApiResponse<SubscriptionRef> {
    let Path(subscription_id) = match path {
        Ok(path) => path,
        Err(rejection) => return rejection.into(),
    };

    lifecycle::request_cancel(
        &app_state.billing,
        &app_state.notifications,
        subscription_id,
        &actor,
    )
    .await
    .map(|_| SubscriptionRef { subscription_id })
    .into()
}

#[tracing::instrument(skip(billing, actor, path), fields(user_id = actor.user_id))]
pub(super) async fn uncancel_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    path: SubscriptionPath,
) -> ApiResponse<SubscriptionRef> {
    let Path(subscription_id) = match path {
        Ok(path) => path,
        Err(rejection) => return rejection.into(),
    };

    lifecycle::request_uncancel(&billing, subscription_id, &actor)
        .await
        .map(|_| SubscriptionRef { subscription_id })
        .into()
}
