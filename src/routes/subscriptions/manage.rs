use crate::{
    authentication::{Actor, PAYMENTS_CREATE, PAYMENTS_DELETE},
    context::BillingContext,
    domain::{
        BillingDuration, NewSubscription, NewTransaction, Subscription, SubscriptionName,
        SubscriptionStatus, SubscriptionUpdate,
    },
    lifecycle::LifecycleError,
    routes::ApiResponse,
};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Durations arrive either as a word (`"monthly"`) or a number of days.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum DurationInput {
    Days(u64),
    Text(String),
}

impl DurationInput {
    fn parse(&self) -> Result<BillingDuration, String> {
        match self {
            Self::Days(days) => BillingDuration::parse(&days.to_string()),
            Self::Text(text) => BillingDuration::parse(text),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateBody {
    subscription_name: Option<String>,
    user_id: Option<i64>,
    amount: Option<i64>,
    duration: Option<DurationInput>,
    product_id: Option<String>,
}

impl TryFrom<CreateBody> for NewSubscription {
    type Error = String;

    fn try_from(body: CreateBody) -> Result<Self, Self::Error> {
        let subscription_name = body
            .subscription_name
            .ok_or("subscription_name is required")?;
        let user_id = body.user_id.ok_or("user_id is required")?;
        let amount = body
            .amount
            .filter(|amount| *amount != 0)
            .ok_or("amount is required")?;
        let duration = body.duration.ok_or("duration is required")?;

        if amount < 0 {
            return Err("amount must not be negative".into());
        }

        Ok(NewSubscription {
            user_id,
            product_id: body.product_id,
            subscription_name: SubscriptionName::parse(subscription_name)?,
            amount,
            duration: duration.parse()?,
            renewal_date: OffsetDateTime::now_utc(),
        })
    }
}

/// Creates the user's subscription, or replaces the one they already have.
#[tracing::instrument(skip(billing, actor, body), fields(user_id = actor.user_id))]
pub(super) async fn create_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    body: JsonBody<CreateBody>,
) -> ApiResponse<Subscription> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection.into(),
    };

    create(&billing, &actor, body).await.into()
}

async fn create(
    billing: &BillingContext,
    actor: &Actor,
    body: CreateBody,
) -> Result<Subscription, LifecycleError> {
    actor.require(PAYMENTS_CREATE)?;
    let new_subscription = NewSubscription::try_from(body).map_err(LifecycleError::Validation)?;

    let (user_id, amount) = (new_subscription.user_id, new_subscription.amount);
    let name = new_subscription.subscription_name.clone();
    match billing.store.upsert_by_user(new_subscription).await {
        Ok(subscription) => {
            billing
                .audit(NewTransaction::subscription(
                    user_id,
                    amount,
                    format!("{name} created"),
                ))
                .await;
            Ok(subscription)
        }
        Err(e) => {
            billing
                .audit(
                    NewTransaction::subscription(user_id, amount, format!("{name} failed to be created"))
                        .with_data(e.to_string()),
                )
                .await;
            Err(e.context("Failed to store subscription").into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateBody {
    user_id: Option<i64>,
    subscription_name: Option<String>,
    amount: Option<i64>,
    duration: Option<DurationInput>,
    status: Option<String>,
}

impl UpdateBody {
    /// Returns the owner to update together with the fields to write.
    fn parse(self) -> Result<(i64, SubscriptionUpdate), String> {
        let user_id = self.user_id.ok_or("user_id is required")?;
        if self.amount.is_some_and(|amount| amount < 0) {
            return Err("amount must not be negative".into());
        }

        let update = SubscriptionUpdate {
            subscription_name: self
                .subscription_name
                .map(SubscriptionName::parse)
                .transpose()?,
            amount: self.amount,
            duration: self.duration.map(|d| d.parse()).transpose()?,
            status: self.status.map(SubscriptionStatus::try_from).transpose()?,
        };

        if update.is_empty() {
            return Err("Nothing to update".into());
        }

        Ok((user_id, update))
    }
}

/// Overwrites the given fields on the subscription owned by `user_id`.
#[tracing::instrument(skip(billing, actor, body), fields(user_id = actor.user_id))]
pub(super) async fn update_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    body: JsonBody<UpdateBody>,
) -> ApiResponse<SubscriptionUpdate> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection.into(),
    };

    update(&billing, &actor, body).await.into()
}

async fn update(
    billing: &BillingContext,
    actor: &Actor,
    body: UpdateBody,
) -> Result<SubscriptionUpdate, LifecycleError> {
    actor.require(PAYMENTS_CREATE)?;
    let (user_id, update) = body.parse().map_err(LifecycleError::Validation)?;

    let label = update
        .subscription_name
        .as_ref()
        .map_or_else(|| "Subscription".to_string(), |name| name.to_string());
    let outcome = billing
        .store
        .update_by_user(user_id, &update)
        .await
        .context("Failed to update subscription")
        .map_err(LifecycleError::from)
        .and_then(|touched| match touched {
            0 => Err(LifecycleError::NotFound),
            _ => Ok(()),
        });

    let transaction = match &outcome {
        Ok(()) => NewTransaction::subscription(user_id, 0, format!("{label} updated"))
            .with_data(serde_json::to_string(&update).unwrap_or_default()),
        Err(e) => NewTransaction::subscription(user_id, 0, format!("{label} failed to update"))
            .with_data(e.to_string()),
    };
    billing.audit(transaction).await;

    outcome.map(|()| update)
}

#[derive(Debug, Deserialize)]
pub(super) struct DeactivateBody {
    user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct DeactivatedUser {
    user_id: i64,
}

/// Soft delete: the row stays, its status becomes `inactive`.
#[tracing::instrument(skip(billing, actor, body), fields(user_id = actor.user_id))]
pub(super) async fn deactivate_subscription(
    State(billing): State<Arc<BillingContext>>,
    actor: Actor,
    body: JsonBody<DeactivateBody>,
) -> ApiResponse<DeactivatedUser> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection.into(),
    };

    deactivate(&billing, &actor, body).await.into()
}

async fn deactivate(
    billing: &BillingContext,
    actor: &Actor,
    body: DeactivateBody,
) -> Result<DeactivatedUser, LifecycleError> {
    actor.require(PAYMENTS_DELETE)?;
    let user_id = body
        .user_id
        .ok_or_else(|| LifecycleError::Validation("user_id is required".into()))?;

    let outcome = billing
        .store
        .deactivate_by_user(user_id)
        .await
        .context("Failed to deactivate subscription")
        .map_err(LifecycleError::from)
        .and_then(|touched| match touched {
            0 => Err(LifecycleError::NotFound),
            _ => Ok(()),
        });

    let transaction = match &outcome {
        Ok(()) => NewTransaction::subscription(user_id, 0, "Subscription deactivated"),
        Err(e) => NewTransaction::subscription(user_id, 0, "Subscription failed to deactivate")
            .with_data(e.to_string()),
    };
    billing.audit(transaction).await;

    outcome.map(|()| DeactivatedUser { user_id })
}
