use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Suspended,
    Cancelled,
    Inactive,
}

impl SubscriptionStatus {
    /// Statuses the renewal worker charges.
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }

    /// Retired subscriptions never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Inactive)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }
}

impl AsRef<str> for SubscriptionStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<SubscriptionStatus> for &'static str {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str()
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_ref() {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" | "pause" => Ok(SubscriptionStatus::Paused),
            "suspended" | "suspend" => Ok(SubscriptionStatus::Suspended),
            "cancelled" | "cancel" => Ok(SubscriptionStatus::Cancelled),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(format!(
                "`{other}` is not a valid variant of SubscriptionStatus",
            )),
        }
    }
}

/// Target of a lifecycle toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesiredStatus {
    Pause,
    Cancel,
    Suspend,
    Active,
}

impl DesiredStatus {
    pub fn parse(s: &str) -> Result<DesiredStatus, String> {
        match s {
            "pause" => Ok(Self::Pause),
            "cancel" => Ok(Self::Cancel),
            "suspend" | "suspended" => Ok(Self::Suspend),
            "active" => Ok(Self::Active),
            other => Err(format!("Invalid status: `{other}`")),
        }
    }

    pub fn flags(&self) -> ActivationFlags {
        match self {
            Self::Pause => ActivationFlags {
                active: false,
                is_premium: false,
            },
            Self::Cancel | Self::Suspend => ActivationFlags {
                active: true,
                is_premium: false,
            },
            Self::Active => ActivationFlags {
                active: true,
                is_premium: true,
            },
        }
    }

    /// Status persisted once the toggle completes.
    pub fn resulting_status(&self) -> SubscriptionStatus {
        match self {
            Self::Pause => SubscriptionStatus::Paused,
            Self::Cancel => SubscriptionStatus::Cancelled,
            Self::Suspend => SubscriptionStatus::Suspended,
            Self::Active => SubscriptionStatus::Active,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Pause => "paused",
            Self::Cancel => "cancelled",
            Self::Suspend => "suspended",
            Self::Active => "resumed",
        }
    }
}

/// Account flags pushed to the user directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ActivationFlags {
    #[serde(serialize_with = "as_int")]
    pub active: bool,
    #[serde(serialize_with = "as_int")]
    pub is_premium: bool,
}

fn as_int<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u8(u8::from(*value))
}
