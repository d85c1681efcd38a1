use super::SubscriptionStore;
use crate::domain::{
    BillingDuration, NewSubscription, NewTransaction, Subscription, SubscriptionLink,
    SubscriptionName, SubscriptionStatus, SubscriptionUpdate, UsageSubscription,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = r#"
    subscription_id, user_id, product_id, subscription_name, amount, duration,
    status, cancel_on_renewal, renewal_date, next_renewal_attempt,
    suspension_date, data, created_at
"#;

#[derive(Clone)]
pub struct PgSubscriptionStore {
    db_pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[derive(FromRow)]
struct SubscriptionRecord {
    subscription_id: Uuid,
    user_id: i64,
    product_id: Option<String>,
    subscription_name: String,
    amount: i64,
    duration: String,
    status: String,
    cancel_on_renewal: bool,
    renewal_date: OffsetDateTime,
    next_renewal_attempt: Option<OffsetDateTime>,
    suspension_date: Option<OffsetDateTime>,
    data: Option<serde_json::Value>,
    created_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRecord> for Subscription {
    type Error = anyhow::Error;

    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        Ok(Subscription {
            subscription_id: record.subscription_id,
            user_id: record.user_id,
            product_id: record.product_id,
            subscription_name: SubscriptionName::parse(record.subscription_name)
                .map_err(|e| anyhow!(e))?,
            amount: record.amount,
            duration: BillingDuration::parse(&record.duration).map_err(|e| anyhow!(e))?,
            status: SubscriptionStatus::try_from(record.status).map_err(|e| anyhow!(e))?,
            cancel_on_renewal: record.cancel_on_renewal,
            renewal_date: record.renewal_date,
            next_renewal_attempt: record.next_renewal_attempt,
            suspension_date: record.suspension_date,
            link: SubscriptionLink::from_data(record.data.as_ref()),
            created_at: record.created_at,
        })
    }
}

#[derive(FromRow)]
struct UsageSubscriptionRecord {
    usage_subscription_id: i64,
    user_id: i64,
    base_contacts: i64,
    contacts_per_tier: i64,
    price_per_tier: i64,
}

impl TryFrom<UsageSubscriptionRecord> for UsageSubscription {
    type Error = anyhow::Error;

    fn try_from(record: UsageSubscriptionRecord) -> Result<Self, Self::Error> {
        Ok(UsageSubscription {
            usage_subscription_id: record.usage_subscription_id,
            user_id: record.user_id,
            base_contacts: record
                .base_contacts
                .try_into()
                .context("base_contacts is negative")?,
            contacts_per_tier: record
                .contacts_per_tier
                .try_into()
                .context("contacts_per_tier is negative")?,
            price_per_tier: record.price_per_tier,
        })
    }
}

fn ensure_updated(rows_affected: u64, subscription_id: Uuid) -> Result<(), anyhow::Error> {
    if rows_affected == 0 {
        return Err(anyhow!("Subscription {subscription_id} no longer exists"));
    }
    Ok(())
}

fn into_subscriptions(
    records: Vec<SubscriptionRecord>,
) -> Result<Vec<Subscription>, anyhow::Error> {
    records.into_iter().map(Subscription::try_from).collect()
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    #[tracing::instrument(name = "Fetch subscription", skip(self))]
    async fn find(&self, subscription_id: Uuid) -> Result<Option<Subscription>, anyhow::Error> {
        let query = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1");

        sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(subscription_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to fetch subscription")?
            .map(Subscription::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "Fetch subscription by user", skip(self))]
    async fn find_by_user(&self, user_id: i64) -> Result<Option<Subscription>, anyhow::Error> {
        let query = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1");

        sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to fetch subscription by user")?
            .map(Subscription::try_from)
            .transpose()
    }

    #[tracing::instrument(name = "List subscriptions", skip(self))]
    async fn list(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Subscription>, i64), anyhow::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
            ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let records = sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list subscriptions")?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.db_pool)
            .await
            .context("Failed to count subscriptions")?;

        Ok((into_subscriptions(records)?, total))
    }

    #[tracing::instrument(name = "Upsert subscription", skip(self, subscription), fields(user_id = subscription.user_id))]
    async fn upsert_by_user(
        &self,
        subscription: NewSubscription,
    ) -> Result<Subscription, anyhow::Error> {
        let query = format!(
            r#"
            INSERT INTO subscriptions (
                subscription_id, user_id, product_id, subscription_name, amount,
                duration, status, cancel_on_renewal, renewal_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, now())
            ON CONFLICT (user_id) DO UPDATE SET
                product_id = EXCLUDED.product_id,
                subscription_name = EXCLUDED.subscription_name,
                amount = EXCLUDED.amount,
                duration = EXCLUDED.duration,
                status = EXCLUDED.status,
                cancel_on_renewal = FALSE,
                renewal_date = EXCLUDED.renewal_date,
                next_renewal_attempt = NULL,
                suspension_date = NULL
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(subscription.user_id)
            .bind(subscription.product_id)
            .bind(subscription.subscription_name.as_ref())
            .bind(subscription.amount)
            .bind(subscription.duration.to_string())
            .bind(SubscriptionStatus::Active.as_str())
            .bind(subscription.renewal_date)
            .fetch_one(&self.db_pool)
            .await
            .context("Failed to upsert subscription")?;

        record.try_into()
    }

    #[tracing::instrument(name = "Update subscription fields", skip(self, update))]
    async fn update_by_user(
        &self,
        user_id: i64,
        update: &SubscriptionUpdate,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                subscription_name = COALESCE($2, subscription_name),
                amount = COALESCE($3, amount),
                duration = COALESCE($4, duration),
                status = COALESCE($5, status)
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(update.subscription_name.as_ref().map(AsRef::<str>::as_ref))
        .bind(update.amount)
        .bind(update.duration.map(|duration| duration.to_string()))
        .bind(update.status.map(<&'static str>::from))
        .execute(&self.db_pool)
        .await
        .context("Failed to update subscription")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "Deactivate subscription", skip(self))]
    async fn deactivate_by_user(&self, user_id: i64) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("UPDATE subscriptions SET status = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(SubscriptionStatus::Inactive.as_str())
            .execute(&self.db_pool)
            .await
            .context("Failed to deactivate subscription")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "Roll subscription forward", skip(self))]
    async fn set_renewal(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET renewal_date = $2, next_renewal_attempt = $3
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(renewal_date)
        .bind(next_renewal_attempt)
        .execute(&self.db_pool)
        .await
        .context("Failed to update renewal date")?;

        ensure_updated(result.rows_affected(), subscription_id)
    }

    #[tracing::instrument(name = "Schedule next renewal attempt", skip(self))]
    async fn set_next_attempt(
        &self,
        subscription_id: Uuid,
        next_renewal_attempt: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions SET next_renewal_attempt = $2 WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(next_renewal_attempt)
        .execute(&self.db_pool)
        .await
        .context("Failed to update next renewal attempt")?;

        ensure_updated(result.rows_affected(), subscription_id)
    }

    #[tracing::instrument(name = "Set subscription status", skip(self))]
    async fn set_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET status = $2
            WHERE subscription_id = $1 AND (status <> $3 OR $2 = $3)
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(SubscriptionStatus::Inactive.as_str())
        .execute(&self.db_pool)
        .await
        .context("Failed to update subscription status")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "Subscription {subscription_id} is missing or inactive"
            ));
        }
        Ok(())
    }

    #[tracing::instrument(name = "Record suspension date", skip(self))]
    async fn set_suspension(
        &self,
        subscription_id: Uuid,
        suspended_at: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        let result =
            sqlx::query("UPDATE subscriptions SET suspension_date = $2 WHERE subscription_id = $1")
                .bind(subscription_id)
                .bind(suspended_at)
                .execute(&self.db_pool)
                .await
                .context("Failed to update suspension date")?;

        ensure_updated(result.rows_affected(), subscription_id)
    }

    #[tracing::instrument(name = "End suspension", skip(self))]
    async fn end_suspension(
        &self,
        subscription_id: Uuid,
        renewal_date: OffsetDateTime,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET renewal_date = $2, suspension_date = NULL
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(renewal_date)
        .execute(&self.db_pool)
        .await
        .context("Failed to end suspension")?;

        ensure_updated(result.rows_affected(), subscription_id)
    }

    #[tracing::instrument(name = "Set cancel on renewal", skip(self))]
    async fn set_cancel_on_renewal(
        &self,
        subscription_id: Uuid,
        cancel_on_renewal: bool,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions SET cancel_on_renewal = $2 WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(cancel_on_renewal)
        .execute(&self.db_pool)
        .await
        .context("Failed to update cancel_on_renewal")?;

        ensure_updated(result.rows_affected(), subscription_id)
    }

    #[tracing::instrument(name = "Fetch subscriptions due for renewal", skip(self))]
    async fn due_for_renewal(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Subscription>, anyhow::Error> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
            WHERE status IN ($1, $2) \
            AND COALESCE(next_renewal_attempt, renewal_date) <= $3 \
            ORDER BY COALESCE(next_renewal_attempt, renewal_date)"
        );

        let records = sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(SubscriptionStatus::Active.as_str())
            .bind(SubscriptionStatus::Suspended.as_str())
            .bind(now)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to fetch subscriptions due for renewal")?;

        into_subscriptions(records)
    }

    #[tracing::instrument(name = "Fetch usage subscription", skip(self))]
    async fn find_usage_subscription(
        &self,
        user_id: i64,
    ) -> Result<Option<UsageSubscription>, anyhow::Error> {
        sqlx::query_as::<_, UsageSubscriptionRecord>(
            r#"
            SELECT usage_subscription_id, user_id, base_contacts, contacts_per_tier, price_per_tier
            FROM usage_subscriptions
            WHERE user_id = $1 AND active
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to fetch usage subscription")?
        .map(UsageSubscription::try_from)
        .transpose()
    }

    #[tracing::instrument(
        name = "Record transaction",
        skip(self, transaction),
        fields(user_id = transaction.user_id, memo = %transaction.memo)
    )]
    async fn record_transaction(&self, transaction: NewTransaction) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO transactions (transaction_id, user_id, amount, type, memo, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(transaction.user_id)
        .bind(transaction.amount)
        .bind(transaction.kind.as_ref())
        .bind(transaction.memo)
        .bind(transaction.data)
        .execute(&self.db_pool)
        .await
        .context("Failed to record transaction")?;

        Ok(())
    }
}
