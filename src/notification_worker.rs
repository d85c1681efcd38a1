use crate::{
    context::BillingContext,
    domain::SubscriptionName,
    notifications,
};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Side effects that run after the response has been returned.
#[derive(Debug, Clone)]
pub enum NotificationJob {
    CancellationRequested {
        subscription_id: Uuid,
        user_id: i64,
        subscription_name: SubscriptionName,
    },
}

#[derive(Clone)]
pub struct NotificationQueue {
    sender: UnboundedSender<NotificationJob>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, UnboundedReceiver<NotificationJob>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Never blocks. A job enqueued after the worker stopped is logged and
    /// dropped.
    pub fn enqueue(&self, job: NotificationJob) {
        if let Err(e) = self.sender.send(job) {
            tracing::error!(job = ?e.0, "Notification worker is gone, dropping job");
        }
    }
}

pub async fn run_worker_until_stopped(
    mut receiver: UnboundedReceiver<NotificationJob>,
    billing: Arc<BillingContext>,
) {
    while let Some(job) = receiver.recv().await {
        execute_job(&billing, job).await;
    }

    tracing::info!("Notification queue closed");
}

#[tracing::instrument(skip(billing))]
pub async fn execute_job(billing: &BillingContext, job: NotificationJob) {
    match job {
        NotificationJob::CancellationRequested {
            subscription_id: _,
            user_id,
            subscription_name,
        } => {
            let owner = match billing.directory.get_user(user_id).await {
                Ok(owner) => Some(owner),
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "Failed to look up owner of a cancelled subscription"
                    );
                    None
                }
            };

            let message = notifications::cancellation_requested(
                &subscription_name,
                owner.as_ref().and_then(|owner| owner.name.as_deref()),
                owner.as_ref().and_then(|owner| owner.email()).as_ref(),
            );

            billing
                .notifier
                .send(&billing.contacts.operations_email, &message)
                .await;
        }
    }
}
