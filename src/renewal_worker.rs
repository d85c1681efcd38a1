use crate::{
    configuration::Settings,
    context::BillingContext,
    domain::{DesiredStatus, NewTransaction, Subscription, SubscriptionStatus},
    lifecycle, pricing,
    renewal::{attempt_renewal, RenewalOptions, RenewalOutcome},
    startup::get_connection_pool,
    store::PgSubscriptionStore,
};
use anyhow::Context;
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tracing::Span;

pub async fn run_worker_until_stopped(config: Settings) -> Result<(), anyhow::Error> {
    let connection_pool = get_connection_pool(&config.database);
    let billing = BillingContext::build(
        &config,
        Arc::new(PgSubscriptionStore::new(connection_pool)),
    )?;
    worker_loop(&billing, config.renewal_worker.poll_interval()).await
}

async fn worker_loop(billing: &BillingContext, poll_interval: Duration) -> Result<(), anyhow::Error> {
    loop {
        match run_renewal_cycle(billing).await {
            Ok(report) => tracing::info!(
                renewed = report.renewed,
                failed = report.failed,
                cancelled = report.cancelled,
                errored = report.errored,
                "Renewal cycle finished"
            ),
            Err(e) => tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Renewal cycle aborted"
            ),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub renewed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Renewed,
    PaymentFailed,
    Cancelled,
}

/// Processes every subscription due now. One subscription failing never
/// stops the others.
#[tracing::instrument(skip_all, err)]
pub async fn run_renewal_cycle(billing: &BillingContext) -> Result<CycleReport, anyhow::Error> {
    let due = billing
        .store
        .due_for_renewal(OffsetDateTime::now_utc())
        .await
        .context("Failed to fetch subscriptions due for renewal")?;

    let mut report = CycleReport::default();
    for mut subscription in due {
        match try_execute_task(billing, &mut subscription).await {
            Ok(ExecutionOutcome::Renewed) => report.renewed += 1,
            Ok(ExecutionOutcome::PaymentFailed) => report.failed += 1,
            Ok(ExecutionOutcome::Cancelled) => report.cancelled += 1,
            Err(_) => report.errored += 1,
        }
    }

    Ok(report)
}

#[tracing::instrument(
    skip_all,
    fields(
        subscription_id = tracing::field::Empty,
        user_id = tracing::field::Empty),
    err
)]
pub async fn try_execute_task(
    billing: &BillingContext,
    subscription: &mut Subscription,
) -> Result<ExecutionOutcome, anyhow::Error> {
    Span::current()
        .record("subscription_id", subscription.subscription_id.to_string())
        .record("user_id", subscription.user_id);

    if subscription.cancel_on_renewal {
        cancel_at_renewal(billing, subscription).await?;
        return Ok(ExecutionOutcome::Cancelled);
    }

    let usage = pricing::usage_quote(billing, subscription.user_id)
        .await
        .map(|usage| usage.quote);
    let options = RenewalOptions {
        signup_fee: None,
        usage,
        first_charge: subscription.next_renewal_attempt.is_none(),
    };

    match attempt_renewal(billing, subscription, options).await {
        RenewalOutcome::Renewed { .. } => Ok(ExecutionOutcome::Renewed),
        RenewalOutcome::Failed { .. } => Ok(ExecutionOutcome::PaymentFailed),
    }
}

/// Drops premium access and retires the subscription instead of charging it.
async fn cancel_at_renewal(
    billing: &BillingContext,
    subscription: &mut Subscription,
) -> Result<(), anyhow::Error> {
    *subscription =
        lifecycle::toggle_to(billing, subscription.subscription_id, DesiredStatus::Cancel).await?;

    billing
        .store
        .set_status(subscription.subscription_id, SubscriptionStatus::Inactive)
        .await
        .context("Failed to deactivate cancelled subscription")?;
    subscription.status = SubscriptionStatus::Inactive;

    billing
        .audit(NewTransaction::subscription(
            subscription.user_id,
            0,
            format!("{} cancelled at renewal", subscription.subscription_name),
        ))
        .await;

    Ok(())
}
