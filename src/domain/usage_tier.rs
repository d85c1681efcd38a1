use serde::Serialize;

/// Pricing parameters of a usage-metered plan. Usage up to `base_contacts`
/// is free; every further block of `contacts_per_tier` costs `price_per_tier`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageTierSchedule {
    base_contacts: u64,
    contacts_per_tier: u64,
    price_per_tier: i64,
}

/// Priced tier for a live usage count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierQuote {
    pub tier: u64,
    pub amount: i64,
    pub contacts: u64,
    pub contacts_on_this_tier: u64,
}

impl UsageTierSchedule {
    pub fn new(
        base_contacts: u64,
        contacts_per_tier: u64,
        price_per_tier: i64,
    ) -> Result<UsageTierSchedule, String> {
        if contacts_per_tier == 0 {
            return Err("contacts_per_tier must be greater than zero".into());
        }
        if price_per_tier < 0 {
            return Err(format!("price_per_tier must not be negative: {price_per_tier}"));
        }

        Ok(Self {
            base_contacts,
            contacts_per_tier,
            price_per_tier,
        })
    }

    /// Returns `Ok(None)` when there is nothing to bill (`count == 0`) and an
    /// error when the count is too large to price.
    pub fn quote(&self, count: u64) -> Result<Option<TierQuote>, String> {
        if count == 0 {
            return Ok(None);
        }

        let out_of_range = || format!("{count} contacts cannot be priced on this schedule");
        let extra_tiers = count
            .saturating_sub(self.base_contacts)
            .div_ceil(self.contacts_per_tier);
        let tier = extra_tiers.checked_add(1).ok_or_else(out_of_range)?;
        let amount = i64::try_from(extra_tiers)
            .ok()
            .and_then(|extra_tiers| extra_tiers.checked_mul(self.price_per_tier))
            .ok_or_else(out_of_range)?;
        let contacts_on_this_tier = extra_tiers
            .checked_mul(self.contacts_per_tier)
            .and_then(|contacts| contacts.checked_add(self.base_contacts))
            .ok_or_else(out_of_range)?;

        Ok(Some(TierQuote {
            tier,
            amount,
            contacts: count,
            contacts_on_this_tier,
        }))
    }
}
