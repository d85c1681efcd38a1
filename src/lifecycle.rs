//! Subscription lifecycle controller: pause, suspend, cancel and resume, plus
//! the soft cancel-on-renewal flag.
//!
//! A toggle runs as a best-effort sequence: timing fields, account
//! propagation, owner email, then the status write. Nothing is rolled back
//! when a later step fails. Inactive subscriptions cannot be toggled.

use crate::{
    authentication::{Actor, AuthorizationError, PAYMENTS_CREATE},
    context::BillingContext,
    directory_client::DirectoryError,
    domain::{ActivationFlags, DesiredStatus, NewTransaction, Subscription, SubscriptionLink},
    notification_worker::{NotificationJob, NotificationQueue},
    notifications,
};
use anyhow::Context;
use futures::{stream, StreamExt};
use time::{Duration, OffsetDateTime};
use tracing::Span;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvalidStatus(String),
    #[error("Subscription not found")]
    NotFound,
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationError),
    #[error("{context}")]
    Directory {
        context: &'static str,
        #[source]
        source: DirectoryError,
    },
    #[error("Error deactivating team members: {failed:?}")]
    TeamDeactivationFailed { failed: Vec<i64> },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Parses `desired_status` before touching anything, then toggles.
pub async fn toggle(
    billing: &BillingContext,
    subscription_id: Uuid,
    desired_status: &str,
) -> Result<Subscription, LifecycleError> {
    let desired = DesiredStatus::parse(desired_status).map_err(LifecycleError::InvalidStatus)?;
    toggle_to(billing, subscription_id, desired).await
}

#[tracing::instrument(
    name = "Toggle subscription",
    skip(billing),
    fields(user_id = tracing::field::Empty)
)]
pub async fn toggle_to(
    billing: &BillingContext,
    subscription_id: Uuid,
    desired: DesiredStatus,
) -> Result<Subscription, LifecycleError> {
    let mut subscription = find_subscription(billing, subscription_id).await?;
    Span::current().record("user_id", subscription.user_id);

    if subscription.status.is_terminal() {
        return Err(LifecycleError::InvalidStatus(format!(
            "Subscription is {}",
            subscription.status
        )));
    }

    let result = apply_toggle(billing, &mut subscription, desired).await;

    let name = &subscription.subscription_name;
    let transaction = match &result {
        Ok(()) => NewTransaction::subscription(
            subscription.user_id,
            0,
            format!("{name} {}", desired.verb()),
        ),
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Failed to toggle subscription"
            );
            NewTransaction::subscription(
                subscription.user_id,
                0,
                format!("{name} failed to be {}", desired.verb()),
            )
            .with_data(e.to_string())
        }
    };
    billing.audit(transaction).await;

    result.map(|()| subscription)
}

async fn apply_toggle(
    billing: &BillingContext,
    subscription: &mut Subscription,
    desired: DesiredStatus,
) -> Result<(), LifecycleError> {
    let now = OffsetDateTime::now_utc();
    let flags = desired.flags();

    if flags.is_premium {
        if let Some(suspended_at) = subscription.suspension_date {
            let renewal_date = shift_for_suspension(subscription.renewal_date, suspended_at, now);
            billing
                .store
                .end_suspension(subscription.subscription_id, renewal_date)
                .await
                .context("Failed to extend renewal date after suspension")?;
            subscription.renewal_date = renewal_date;
            subscription.suspension_date = None;
        }
    } else {
        billing
            .store
            .set_suspension(subscription.subscription_id, now)
            .await
            .context("Failed to record suspension date")?;
        subscription.suspension_date = Some(now);
    }

    propagate_activation(billing, subscription, flags).await?;
    notify_owner(billing, subscription, desired).await;

    let status = desired.resulting_status();
    billing
        .store
        .set_status(subscription.subscription_id, status)
        .await
        .context("Failed to persist subscription status")?;
    subscription.status = status;

    Ok(())
}

/// Pushes the renewal date back by the whole days spent suspended. A
/// suspension stamped in the future does not move the date.
pub fn shift_for_suspension(
    renewal_date: OffsetDateTime,
    suspended_at: OffsetDateTime,
    now: OffsetDateTime,
) -> OffsetDateTime {
    let days_suspended = (now - suspended_at).whole_days().max(0);
    renewal_date + Duration::days(days_suspended)
}

async fn propagate_activation(
    billing: &BillingContext,
    subscription: &Subscription,
    flags: ActivationFlags,
) -> Result<(), LifecycleError> {
    match subscription.link {
        SubscriptionLink::Individual => billing
            .directory
            .set_user_activation(subscription.user_id, flags)
            .await
            .map_err(|source| LifecycleError::Directory {
                context: "Error deactivating user",
                source,
            }),
        SubscriptionLink::TeamLinked { team_id } => {
            let members = billing
                .directory
                .list_team_members(team_id)
                .await
                .map_err(|source| LifecycleError::Directory {
                    context: "Error fetching team members",
                    source,
                })?;

            let failed = set_team_activation(billing, &members, flags).await;
            if failed.is_empty() {
                Ok(())
            } else {
                Err(LifecycleError::TeamDeactivationFailed { failed })
            }
        }
    }
}

/// Updates every member with bounded concurrency and returns the ids whose
/// update failed. Members already updated stay updated.
#[tracing::instrument(skip(billing, members), fields(members = members.len()))]
async fn set_team_activation(
    billing: &BillingContext,
    members: &[i64],
    flags: ActivationFlags,
) -> Vec<i64> {
    let directory = &billing.directory;

    let mut failed: Vec<i64> = stream::iter(members.iter().copied())
        .map(|member| async move {
            (member, directory.set_user_activation(member, flags).await)
        })
        .buffer_unordered(billing.max_concurrent_directory_requests)
        .filter_map(|(member, result)| async move {
            result.err().map(|e| {
                tracing::error!(
                    member,
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to update team member"
                );
                member
            })
        })
        .collect()
        .await;

    failed.sort_unstable();
    failed
}

async fn notify_owner(billing: &BillingContext, subscription: &Subscription, desired: DesiredStatus) {
    let owner_email = match billing.directory.get_user(subscription.user_id).await {
        Ok(owner) => owner.email(),
        Err(e) => {
            tracing::warn!(
                error.cause_chain = ?e,
                error.message = %e,
                "Failed to look up subscription owner"
            );
            None
        }
    };

    match owner_email {
        None => {
            let message = notifications::orphaned_toggle(&subscription.subscription_name);
            billing
                .notifier
                .send(&billing.contacts.admin_email, &message)
                .await;
        }
        Some(email) => {
            let link = billing.manage_link(&email);
            if let Some(message) =
                notifications::status_changed(desired, &subscription.subscription_name, &link)
            {
                billing.notifier.send(&email, &message).await;
            }
        }
    }
}

/// Loads a subscription the actor may act on: its owner or a holder of
/// `payments_create`.
pub async fn find_authorized(
    billing: &BillingContext,
    subscription_id: Uuid,
    actor: &Actor,
) -> Result<Subscription, LifecycleError> {
    let subscription = find_subscription(billing, subscription_id).await?;
    actor.require_owner_or(subscription.user_id, PAYMENTS_CREATE)?;
    Ok(subscription)
}

/// Flags the subscription to lapse at its next renewal and lets operations
/// know once the response is out.
#[tracing::instrument(name = "Request cancellation", skip(billing, queue))]
pub async fn request_cancel(
    billing: &BillingContext,
    queue: &NotificationQueue,
    subscription_id: Uuid,
    actor: &Actor,
) -> Result<Subscription, LifecycleError> {
    let subscription = set_cancel_on_renewal(billing, subscription_id, actor, true).await?;

    queue.enqueue(NotificationJob::CancellationRequested {
        subscription_id,
        user_id: subscription.user_id,
        subscription_name: subscription.subscription_name.clone(),
    });

    Ok(subscription)
}

#[tracing::instrument(name = "Withdraw cancellation", skip(billing))]
pub async fn request_uncancel(
    billing: &BillingContext,
    subscription_id: Uuid,
    actor: &Actor,
) -> Result<Subscription, LifecycleError> {
    set_cancel_on_renewal(billing, subscription_id, actor, false).await
}

async fn set_cancel_on_renewal(
    billing: &BillingContext,
    subscription_id: Uuid,
    actor: &Actor,
    cancel_on_renewal: bool,
) -> Result<Subscription, LifecycleError> {
    let mut subscription = find_authorized(billing, subscription_id, actor).await?;
    let action = if cancel_on_renewal {
        "set to cancel on renewal"
    } else {
        "cancellation withdrawn"
    };

    let name = subscription.subscription_name.clone();
    match billing
        .store
        .set_cancel_on_renewal(subscription_id, cancel_on_renewal)
        .await
    {
        Ok(()) => {
            subscription.cancel_on_renewal = cancel_on_renewal;
            billing
                .audit(NewTransaction::subscription(
                    subscription.user_id,
                    0,
                    format!("{name} {action}"),
                ))
                .await;
            Ok(subscription)
        }
        Err(e) => {
            billing
                .audit(
                    NewTransaction::subscription(
                        subscription.user_id,
                        0,
                        format!("{name} failed: {action}"),
                    )
                    .with_data(e.to_string()),
                )
                .await;
            Err(e.context("Failed to update cancel_on_renewal").into())
        }
    }
}

async fn find_subscription(
    billing: &BillingContext,
    subscription_id: Uuid,
) -> Result<Subscription, LifecycleError> {
    billing
        .store
        .find(subscription_id)
        .await
        .context("Failed to fetch subscription")?
        .ok_or(LifecycleError::NotFound)
}
