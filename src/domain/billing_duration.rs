use serde::{Deserialize, Serialize};
use std::fmt;
use time::{error::ComponentRange, util::days_in_year_month, Date, Duration, Month, OffsetDateTime};

/// Length of one billing period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum BillingDuration {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Days(u32),
}

impl BillingDuration {
    pub fn parse(s: &str) -> Result<BillingDuration, String> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "annual" | "annually" | "year" => Ok(Self::Yearly),
            other => match other.parse::<u32>() {
                Ok(days) if days > 0 => Ok(Self::Days(days)),
                _ => Err(format!("`{s}` is not a valid subscription duration")),
            },
        }
    }

    /// Rolls `renewal_date` forward by one period. Calendar periods clamp to
    /// the last day of a shorter month.
    pub fn next_renewal_date(
        &self,
        renewal_date: OffsetDateTime,
    ) -> Result<OffsetDateTime, ComponentRange> {
        match self {
            Self::Daily => Ok(renewal_date + Duration::days(1)),
            Self::Weekly => Ok(renewal_date + Duration::weeks(1)),
            Self::Days(days) => Ok(renewal_date + Duration::days(i64::from(*days))),
            Self::Monthly => add_months(renewal_date, 1),
            Self::Yearly => add_months(renewal_date, 12),
        }
    }
}

fn add_months(date: OffsetDateTime, months: u32) -> Result<OffsetDateTime, ComponentRange> {
    let month_index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month())) - 1
        + i64::from(months);
    let year = month_index.div_euclid(12) as i32;
    let month = Month::try_from((month_index.rem_euclid(12) + 1) as u8)?;
    let day = date.day().min(days_in_year_month(year, month));

    Ok(date.replace_date(Date::from_calendar_date(year, month, day)?))
}

impl fmt::Display for BillingDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Yearly => f.write_str("yearly"),
            Self::Days(days) => write!(f, "{days}"),
        }
    }
}

impl TryFrom<String> for BillingDuration {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<BillingDuration> for String {
    fn from(duration: BillingDuration) -> Self {
        duration.to_string()
    }
}
