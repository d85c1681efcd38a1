use super::{BillingDuration, SubscriptionName, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: i64,
    pub product_id: Option<String>,
    pub subscription_name: SubscriptionName,
    pub amount: i64,
    pub duration: BillingDuration,
    pub status: SubscriptionStatus,
    pub cancel_on_renewal: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub renewal_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_renewal_attempt: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub suspension_date: Option<OffsetDateTime>,
    pub link: SubscriptionLink,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Subscription {
    /// The instant the renewal worker should next try to charge.
    pub fn due_at(&self) -> OffsetDateTime {
        self.next_renewal_attempt.unwrap_or(self.renewal_date)
    }
}

/// Who the subscription grants access to. Stored in the `data` JSON column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "LinkData", into = "LinkData")]
pub enum SubscriptionLink {
    #[default]
    Individual,
    TeamLinked { team_id: i64 },
}

#[derive(Default, Deserialize, Serialize)]
struct LinkData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team_id: Option<i64>,
}

impl From<LinkData> for SubscriptionLink {
    fn from(data: LinkData) -> Self {
        match data.team_id {
            Some(team_id) => Self::TeamLinked { team_id },
            None => Self::Individual,
        }
    }
}

impl From<SubscriptionLink> for LinkData {
    fn from(link: SubscriptionLink) -> Self {
        match link {
            SubscriptionLink::Individual => LinkData { team_id: None },
            SubscriptionLink::TeamLinked { team_id } => LinkData {
                team_id: Some(team_id),
            },
        }
    }
}

impl SubscriptionLink {
    /// Decodes the opaque `data` column. Anything without a `team_id` is
    /// treated as an individual subscription.
    pub fn from_data(data: Option<&serde_json::Value>) -> Self {
        data.and_then(|value| serde_json::from_value::<LinkData>(value.clone()).ok())
            .map(Self::from)
            .unwrap_or_default()
    }
}

/// Fields written when a subscription is created or replaced for a user.
#[derive(Clone, Debug)]
pub struct NewSubscription {
    pub user_id: i64,
    pub product_id: Option<String>,
    pub subscription_name: SubscriptionName,
    pub amount: i64,
    pub duration: BillingDuration,
    pub renewal_date: OffsetDateTime,
}

/// Partial update applied to the subscription owned by a user.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_name: Option<SubscriptionName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<BillingDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.subscription_name.is_none()
            && self.amount.is_none()
            && self.duration.is_none()
            && self.status.is_none()
    }
}

/// Append-only audit record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewTransaction {
    pub user_id: i64,
    pub amount: i64,
    pub kind: TransactionKind,
    pub memo: String,
    pub data: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Subscription,
}

impl AsRef<str> for TransactionKind {
    fn as_ref(&self) -> &'static str {
        match self {
            TransactionKind::Subscription => "subscription",
        }
    }
}

impl NewTransaction {
    pub fn subscription(user_id: i64, amount: i64, memo: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            kind: TransactionKind::Subscription,
            memo: memo.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Usage-metered add-on record for a user.
#[derive(Clone, Debug)]
pub struct UsageSubscription {
    pub usage_subscription_id: i64,
    pub user_id: i64,
    pub base_contacts: u64,
    pub contacts_per_tier: u64,
    pub price_per_tier: i64,
}
