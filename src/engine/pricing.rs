use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::overlap::{validate_date, validate_stay};
use super::{Scheduler, SchedulerError};

/// Price of the night of `day`.
///
/// The governing override (closed-range membership, latest start, highest id) supplies
/// `special_price` on any night, or `weekend_price` on Friday/Saturday nights. Everything
/// else falls back to `base`.
pub fn resolve_night_price(set: Option<&OverrideSet>, base: Money, day: NaiveDate) -> Money {
    let Some(governing) = set.and_then(|s| s.governing(day)) else {
        return base;
    };
    if let Some(price) = governing.special_price {
        return price;
    }
    if is_weekend_night(day)
        && let Some(price) = governing.weekend_price
    {
        return price;
    }
    base
}

impl Scheduler {
    pub async fn price_for_night(&self, owner_id: Ulid, date: NaiveDate) -> Result<Money, SchedulerError> {
        validate_date(date)?;
        let owner = self.load_owner(owner_id, "price for night").await?;
        let set = self.store.get(&owner_id);
        let guard = match &set {
            Some(s) => Some(s.read().await),
            None => None,
        };
        Ok(resolve_night_price(
            guard.as_deref(),
            owner.base_price_per_night,
            date,
        ))
    }

    /// Per-night breakdown of a stay `[check_in, check_out)`.
    pub async fn quote(
        &self,
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Quote, SchedulerError> {
        let span = validate_stay(check_in, check_out)?;
        let owner = self.load_owner(owner_id, "quote").await?;
        let set = self.store.get(&owner_id);
        let guard = match &set {
            Some(s) => Some(s.read().await),
            None => None,
        };

        let nights: Vec<NightPrice> = span
            .nights_iter()
            .map(|date| NightPrice {
                date,
                price: resolve_night_price(guard.as_deref(), owner.base_price_per_night, date),
            })
            .collect();
        let total = nights
            .iter()
            .try_fold(0 as Money, |acc, n| acc.checked_add(n.price))
            .ok_or(SchedulerError::LimitExceeded("price overflow"))?;
        tracing::debug!("quote {owner_id} {span}: {} nights, total {total}", nights.len());
        Ok(Quote {
            owner_id,
            nights,
            total,
        })
    }

    pub async fn calculate_price(
        &self,
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Money, SchedulerError> {
        Ok(self.quote(owner_id, check_in, check_out).await?.total)
    }
}
