//! Persistence seam for subscriptions and their audit trail.

mod postgres;

pub use postgres::PgSubscriptionStore;

use crate::domain::{
    NewSubscription, NewTransaction, Subscription, SubscriptionStatus, SubscriptionUpdate,
    UsageSubscription,
};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find(&self, subscription_id: Uuid) -> Result<Option<Subscription>, anyhow::Error>;

    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, anyhow::Error>;

    /// Newest first. Returns the page together with the total row count.
    async fn list(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Subscription>, i64), anyhow::Error>;

    /// Creates the user's subscription or replaces the existing one, leaving
    /// it active with no pending retry, suspension or cancellation.
    async fn upsert_by_user(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, anyhow::Error>;

    /// Returns the number of rows touched.
    async fn update_by_user(
        &self,
        user_id: i64,
        update: &SubscriptionUpdate,
    ) -> Result<u64, anyhow::Error>;

    /// Returns the number of rows touched.
    async fn deactivate_by_user(&self, user_id: i64) -> Result<u64, anyhow::Error>;

    // The setters below write only their own columns, so concurrent changes
    // to other fields of the same row survive. Each fails if the row is gone.

    /// Rolls the subscription forward after a successful charge.
    async fn set_renewal(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error>;

    async fn set_next_attempt(
        &self,
        subscription_id: Uuid,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error>;

    /// Fails without writing when the subscription is `inactive` and
    /// `status` is anything else.
    async fn set_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), anyhow::Error>;

    async fn set_suspension(
        &self,
        subscription_id: Uuid,
        suspended_at: OffsetDateTime,
    ) -> Result<(), anyhow::Error>;

    /// Clears the suspension date and moves the renewal date in one write.
    async fn end_suspension(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
    ) -> Result<(), anyhow::Error>;

    async fn set_cancel_on_renewal(
        &self,
        subscription_id: Uuid,
        cancel_on_renewal: bool,
    ) -> Result<(), anyhow::Error>;

    /// Billable subscriptions whose next attempt (or renewal date, when no
    /// attempt has been scheduled) is at or before `now`.
    async fn due_for_renewal(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Subscription>, anyhow::Error>;

    async fn find_usage_subscription(
        &self,
        user_id: i64,
    ) -> Result<Option<UsageSubscription>, anyhow::Error>;

    async fn record_transaction(&self, transaction: NewTransaction) -> Result<(), anyhow::Error>;
}
