mod billing_duration;
mod email_address;
mod subscription;
mod subscription_name;
mod subscription_status;
mod usage_tier;

pub use billing_duration::BillingDuration;
pub use email_address::EmailAddress;
pub use subscription::{
    NewSubscription, NewTransaction, Subscription, SubscriptionLink, SubscriptionUpdate,
    TransactionKind, UsageSubscription,
};
pub use subscription_name::SubscriptionName;
pub use subscription_status::{ActivationFlags, DesiredStatus, SubscriptionStatus};
pub use usage_tier::{TierQuote, UsageTierSchedule};
