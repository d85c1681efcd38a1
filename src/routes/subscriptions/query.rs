use crate::{
    authentication::{Actor, PAYMENTS_READ_ALL},
    context::BillingContext,
    domain::Subscription,
    lifecycle::LifecycleError,
    routes::ApiResponse,
};
use anyhow::Context;
use axum::extract::{rejection::QueryRejection, Query, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct Pagination {
    page: Option<u32>,
    limit: Option<u32>,
}

impl Pagination {
    fn page(&self) -> u32 {
        self.page.unwrap_or(DEFAULT_PAGE).max(1)
    }

    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Serialize)]
pub(super) struct SubscriptionPage {
    subscriptions: Vec<Subscription>,
    page: u32,
    limit: u32,
    total: i64,
}

#[tracing::instrument(skip(billing, actor, query), fields(user_id = actor.user_id))]
pub(super) async fn list_subscriptions(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    query: Result<Query<Pagination>, QueryRejection>,
) -> ApiResponse<SubscriptionPage> {
    let Query(pagination) = match query {
        Ok(query) => query,
        Err(rejection) => return rejection.into(),
    };

    list(&billing, &actor, &pagination).await.into()
}

async fn list(
    billing: &BillingContext,
    actor: &Actor,
    pagination: &Pagination,
) -> Result<SubscriptionPage, LifecycleError> {
    actor.require(PAYMENTS_READ_ALL)?;

    let (page, limit) = (pagination.page(), pagination.limit());
    let (subscriptions, total) = billing
        .store
        .list(page, limit)
        .await
        .context("Failed to list subscriptions")?;

    Ok(SubscriptionPage {
        subscriptions,
        page,
        limit,
        total,
    })
}

/// The caller's own subscription, or `null` when they have none.
#[tracing::instrument(skip(billing, actor), fields(user_id = actor.user_id))]
pub(super) async fn own_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
) -> ApiResponse<Option<Subscription>> {
    billing
        .store
        .find_by_user(actor.user_id)
        .await
        .context("Failed to fetch subscription")
        .map_err(LifecycleError::from)
        .into()
}
