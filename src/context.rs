use crate::{
    configuration::Settings,
    directory_client::DirectoryClient,
    domain::{EmailAddress, NewTransaction},
    notifications::{manage_link, Notifier},
    payment_client::PaymentClient,
    store::SubscriptionStore,
    usage_client::UsageClient,
};
use anyhow::anyhow;
use std::sync::Arc;

/// Everything the lifecycle controller and renewal engine talk to, built once
/// from [`Settings`].
pub struct BillingContext {
    pub store: Arc<dyn SubscriptionStore>,
    pub directory: DirectoryClient,
    pub payments: PaymentClient,
    pub usage: UsageClient,
    pub notifier: Notifier,
    pub contacts: Contacts,
    pub max_concurrent_directory_requests: usize,
}

pub struct Contacts {
    pub admin_email: EmailAddress,
    pub operations_email: EmailAddress,
    pub frontend_url: String,
}

impl BillingContext {
    pub fn build(
        settings: &Settings,
        store: Arc<dyn SubscriptionStore>,
    ) -> Result<Self, anyhow::Error> {
        let contacts = Contacts {
            admin_email: settings.application.admin_email().map_err(|e| anyhow!(e))?,
            operations_email: settings
                .application
                .operations_email()
                .map_err(|e| anyhow!(e))?,
            frontend_url: settings.application.frontend_url.clone(),
        };

        Ok(Self {
            store,
            directory: settings.directory.client()?,
            payments: settings.payments.client()?,
            usage: settings.usage_api.client()?,
            notifier: Notifier::new(settings.email_client.client()?, settings.email_client.enabled),
            contacts,
            max_concurrent_directory_requests: settings.directory.max_concurrent_requests.max(1),
        })
    }

    pub fn manage_link(&self, email: &EmailAddress) -> String {
        manage_link(&self.contacts.frontend_url, email)
    }

    /// Audit writes never undo the operation they describe, so a failure here
    /// is logged and swallowed.
    pub async fn audit(&self, transaction: NewTransaction) {
        if let Err(e) = self.store.record_transaction(transaction).await {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Failed to record transaction"
            );
        }
    }
}
