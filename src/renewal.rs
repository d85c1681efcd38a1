//! Renewal and retry engine.

use crate::{
    context::BillingContext,
    domain::{DesiredStatus, NewTransaction, Subscription, SubscriptionStatus, TierQuote},
    lifecycle, notifications,
    payment_client::ChargeRequest,
};
use anyhow::{anyhow, Context};
use time::{Duration, OffsetDateTime};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct RenewalOptions {
    /// One-time fee added to the first charge.
    pub signup_fee: Option<i64>,
    /// Usage-metered overage billed alongside the plan amount.
    pub usage: Option<TierQuote>,
    /// Sends the "created" receipt instead of the "renewed" one.
    pub first_charge: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed {
        amount: i64,
        renewal_date: OffsetDateTime,
    },
    Failed {
        reason: String,
        next_attempt: Option<OffsetDateTime>,
    },
}

/// Charges the subscription and rolls it forward. Never fails: a declined or
/// erroring charge is recorded, the owner is told and a retry is scheduled.
#[tracing::instrument(
    name = "Attempt subscription renewal",
    skip(billing, subscription),
    fields(
        subscription_id = %subscription.subscription_id,
        user_id = subscription.user_id
    )
)]
pub async fn attempt_renewal(
    billing: &BillingContext,
    subscription: &mut Subscription,
    options: RenewalOptions,
) -> RenewalOutcome {
    let charge = charge_amount(subscription, &options);
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

    let result = match charge {
        Some(amount) => {
            charge_and_roll_forward(billing, subscription, amount, owner_email.is_some()).await
        }
        None => Err(anyhow!("Charge amount is out of range")),
    };
    let amount = charge.unwrap_or(subscription.amount);

    match result {
        Ok(raw_payment) => {
            if subscription.status == SubscriptionStatus::Suspended {
                reactivate(billing, subscription).await;
            }

            if let Some(email) = &owner_email {
                let name = &subscription.subscription_name;
                let message = if options.first_charge {
                    notifications::subscription_created(name, amount, OffsetDateTime::now_utc())
                } else {
                    notifications::subscription_renewed(name, amount, subscription.renewal_date)
                };
                billing.notifier.send(email, &message).await;
            }

            billing
                .audit(
                    NewTransaction::subscription(
                        subscription.user_id,
                        amount,
                        subscription.subscription_name.to_string(),
                    )
                    .with_data(raw_payment.to_string()),
                )
                .await;

            tracing::info!("Subscription renewed");
            RenewalOutcome::Renewed {
                amount,
                renewal_date: subscription.renewal_date,
            }
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Subscription renewal failed"
            );

            let recipient = owner_email
                .clone()
                .unwrap_or_else(|| billing.contacts.admin_email.clone());
            let link = billing.manage_link(&recipient);
            let message = notifications::renewal_failed(
                &subscription.subscription_name,
                OffsetDateTime::now_utc(),
                &link,
            );
            billing.notifier.send(&recipient, &message).await;

            let next_attempt = match schedule_next_retry(billing, subscription).await {
                Ok(next_attempt) => Some(next_attempt),
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "Failed to schedule the next renewal attempt"
                    );
                    None
                }
            };

            billing
                .audit(
                    NewTransaction::subscription(
                        subscription.user_id,
                        amount,
                        format!("{} (failed)", subscription.subscription_name),
                    )
                    .with_data(e.to_string()),
                )
                .await;

            RenewalOutcome::Failed {
                reason: e.to_string(),
                next_attempt,
            }
        }
    }
}

/// `None` when the total does not fit in an `i64`.
fn charge_amount(subscription: &Subscription, options: &RenewalOptions) -> Option<i64> {
    subscription
        .amount
        .checked_add(options.signup_fee.unwrap_or(0))?
        .checked_add(options.usage.map_or(0, |quote| quote.amount))
}

/// Returns the raw payment response on success.
async fn charge_and_roll_forward(
    billing: &BillingContext,
    subscription: &mut Subscription,
    amount: i64,
    has_owner_email: bool,
) -> Result<serde_json::Value, anyhow::Error> {
    if !has_owner_email {
        return Err(anyhow!("No email found for this subscription"));
    }

    let renewal_date = subscription
        .duration
        .next_renewal_date(subscription.renewal_date)
        .context("Failed to compute the next renewal date")?;

    let memo = subscription.subscription_name.to_string();
    let outcome = billing
        .payments
        .charge(&ChargeRequest {
            amount,
            user_id: subscription.user_id,
            memo: &memo,
            product_id: subscription.product_id.as_deref(),
        })
        .await
        .context("Payment request failed")?;

    if !outcome.is_completed() {
        return Err(anyhow!("Payment failed | {}", outcome.raw));
    }

    subscription.renewal_date = renewal_date;
    subscription.next_renewal_attempt = Some(renewal_date);
    if let Err(e) = billing
        .store
        .set_renewal(subscription.subscription_id, renewal_date, renewal_date)
        .await
    {
        // The charge went through; retrying would bill the owner twice.
        tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "Failed to persist the new renewal date after a successful charge"
        );
    }

    Ok(outcome.raw)
}

async fn reactivate(billing: &BillingContext, subscription: &mut Subscription) {
    match lifecycle::toggle_to(billing, subscription.subscription_id, DesiredStatus::Active).await
    {
        Ok(reactivated) => *subscription = reactivated,
        Err(e) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "Failed to reactivate suspended subscription after payment"
        ),
    }
}

/// Backoff ladder keyed on days waited since the last scheduled attempt:
/// up to one day waits 1 more day, up to four waits 3, anything longer 7.
pub fn next_retry_at(
    last_attempt: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    let days_waited = last_attempt
        .map(|last| (now - last).as_seconds_f64() / SECONDS_PER_DAY)
        .unwrap_or(0.0);

    let wait = if days_waited <= 1.0 {
        Duration::days(1)
    } else if days_waited <= 4.0 {
        Duration::days(3)
    } else {
        Duration::days(7)
    };

    now + wait
}

/// Moves `next_renewal_attempt` along the backoff ladder. `renewal_date` is
/// left alone.
#[tracing::instrument(skip(billing, subscription), fields(subscription_id = %subscription.subscription_id))]
pub async fn schedule_next_retry(
    billing: &BillingContext,
    subscription: &mut Subscription,
) -> Result<OffsetDateTime, anyhow::Error> {
    let next_attempt = next_retry_at(subscription.next_renewal_attempt, OffsetDateTime::now_utc());

    billing
        .store
        .set_next_attempt(subscription.subscription_id, next_attempt)
        .await
        .context("Failed to save the next renewal attempt")?;
    subscription.next_renewal_attempt = Some(next_attempt);

    tracing::info!(%next_attempt, "Next renewal attempt scheduled");
    Ok(next_attempt)
}
