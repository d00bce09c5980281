use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use ulid::Ulid;

use crate::limits::{MAX_YEAR, MIN_YEAR};
use crate::model::*;

use super::pricing::resolve_night_price;
use super::{Scheduler, SchedulerError};

/// First day of `year-month` and of the month after it.
fn month_bounds(year: i32, month: u32) -> Result<DateSpan, SchedulerError> {
    let invalid = SchedulerError::InvalidMonth { year, month };
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(invalid);
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(invalid)?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or(SchedulerError::InvalidMonth { year, month })?;
    Ok(DateSpan::new(first, next))
}

impl Scheduler {
    /// One entry per day of the month.
    ///
    /// A day is booked when a live reservation sleeps there that night (for a unit, in any
    /// of its sub-units). Price and reason come from the governing override.
    pub async fn build_month(
        &self,
        owner_id: Ulid,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, DayAvailability>, SchedulerError> {
        const OP: &str = "build month";
        let span = month_bounds(year, month)?;
        let owner = self.load_owner(owner_id, OP).await?;
        let reservations = self
            .collab
            .ledger
            .list_overlapping_reservations(owner.owner_ref(), span.start, span.end)
            .await
            .map_err(SchedulerError::from_store(OP))?;

        let set = self.store.get(&owner_id);
        let guard = match &set {
            Some(s) => Some(s.read().await),
            None => None,
        };
        let rows = guard.as_deref();
        let active = owner.is_active();

        let mut days = BTreeMap::new();
        for date in span.nights_iter() {
            let is_booked = reservations.iter().any(|r| r.occupies_night(date));
            let governing = rows.and_then(|s| s.governing(date));
            let is_available =
                !is_booked && governing.is_none_or(|o| o.is_available) && active;
            days.insert(
                date,
                DayAvailability {
                    date,
                    is_available,
                    is_booked,
                    is_weekend: is_weekend_night(date),
                    price: resolve_night_price(rows, owner.base_price_per_night, date),
                    reason: governing.and_then(|o| o.reason),
                    override_id: governing.map(|o| o.id),
                },
            );
        }
        Ok(days)
    }
}
