use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Scheduler, SchedulerError};

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

pub(crate) fn validate_date(day: NaiveDate) -> Result<(), SchedulerError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&day.year()) {
        return Err(SchedulerError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Checks an override range: ordered, in the accepted years, not absurdly wide.
pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, SchedulerError> {
    validate_date(start)?;
    validate_date(end)?;
    let span = DateSpan::try_new(start, end).ok_or(SchedulerError::InvalidRange { start, end })?;
    if span.nights() > MAX_OVERRIDE_DAYS {
        return Err(SchedulerError::LimitExceeded("range too wide"));
    }
    Ok(span)
}

/// Same as [`validate_range`] for a guest stay `[check_in, check_out)`.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<DateSpan, SchedulerError> {
    validate_date(check_in)?;
    validate_date(check_out)?;
    let span = DateSpan::try_new(check_in, check_out).ok_or(SchedulerError::InvalidRange {
        start: check_in,
        end: check_out,
    })?;
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(SchedulerError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// First override in `set`, other than `exclude`, overlapping `span` (half-open).
/// Ranges that only touch at a boundary never match.
pub fn find_overlap<'a>(
    set: &'a OverrideSet,
    span: &DateSpan,
    exclude: Option<Ulid>,
) -> Option<&'a AvailabilityOverride> {
    set.overlapping(span).find(|o| Some(o.id) != exclude)
}

/// True if a blocking override overlaps `span`.
pub(crate) fn blocked_during(set: &OverrideSet, span: &DateSpan) -> bool {
    set.overlapping(span).any(|o| !o.is_available)
}

impl Scheduler {
    /// Does any override of `owner_id`, other than `exclude_id`, overlap `[start, end)`?
    pub async fn has_overlap(
        &self,
        owner_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        exclude_id: Option<Ulid>,
    ) -> Result<bool, SchedulerError> {
        let span = DateSpan::try_new(start, end).ok_or(SchedulerError::InvalidRange { start, end })?;
        let Some(set) = self.store.get(&owner_id) else {
            return Ok(false);
        };
        let guard = set.read().await;
        Ok(find_overlap(&guard, &span, exclude_id).is_some())
    }
}
