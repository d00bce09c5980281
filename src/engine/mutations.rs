use chrono::{Days, NaiveDate};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::overlap::{find_overlap, now_ms, today, validate_range};
use super::{OverlapPolicy, Scheduler, SchedulerError};

/// Who and when, stamped on every row a transaction writes.
#[derive(Clone, Copy)]
struct Stamp {
    at: Ms,
    by: Option<Ulid>,
}

fn validate_prices(fields: &OverrideFields) -> Result<(), SchedulerError> {
    if fields.special_price.is_some_and(|p| p < 0) || fields.weekend_price.is_some_and(|p| p < 0) {
        return Err(SchedulerError::LimitExceeded("price must not be negative"));
    }
    Ok(())
}

fn with_fields(mut record: AvailabilityOverride, fields: OverrideFields, stamp: Stamp) -> AvailabilityOverride {
    record.is_available = fields.is_available;
    record.reason = fields.reason;
    record.special_price = fields.special_price;
    record.weekend_price = fields.weekend_price;
    record.updated_at = stamp.at;
    record.updated_by = stamp.by;
    record
}

/// What an exact-range match means for a write.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ExactRange {
    /// Update the matching row under either policy.
    Upsert,
    /// The matching row is an overlap like any other; reject mode refuses it.
    FollowPolicy,
}

/// Decide how one range lands in `set`: update of an exact-range row, or a new row.
///
/// `fields` sees the exact-range row (if any) so callers can keep the parts they don't set.
fn plan_range(
    set: &OverrideSet,
    span: DateSpan,
    policy: OverlapPolicy,
    exact: ExactRange,
    stamp: Stamp,
    fields: impl FnOnce(Option<&AvailabilityOverride>) -> OverrideFields,
) -> Result<Event, SchedulerError> {
    let matched = set.exact_match(&span);
    if policy == OverlapPolicy::Reject
        && !(exact == ExactRange::Upsert && matched.is_some())
        && let Some(existing) = find_overlap(set, &span, None)
    {
        return Err(SchedulerError::Overlap {
            existing: existing.id,
        });
    }
    if let Some(existing) = matched {
        let fields = fields(Some(existing));
        return Ok(Event::OverrideUpdated {
            record: with_fields(existing.clone(), fields, stamp),
        });
    }
    if set.len() >= MAX_OVERRIDES_PER_OWNER {
        return Err(SchedulerError::LimitExceeded("too many overrides for owner"));
    }
    let fields = fields(None);
    Ok(Event::OverrideInserted {
        record: AvailabilityOverride {
            id: Ulid::new(),
            owner: set.owner,
            span,
            is_available: fields.is_available,
            reason: fields.reason,
            special_price: fields.special_price,
            weekend_price: fields.weekend_price,
            created_at: stamp.at,
            updated_at: stamp.at,
            updated_by: stamp.by,
        },
    })
}

fn note_rejection(op: &'static str, owner: OwnerRef, err: &SchedulerError) {
    if let SchedulerError::Overlap { existing } = err {
        warn!("{op}: {owner} rejected, overlaps {existing}");
        metrics::counter!(crate::observability::OVERLAP_REJECTIONS_TOTAL, "op" => op).increment(1);
    }
}

impl Scheduler {
    /// Upsert one range for an owner under the caller's overlap policy.
    pub async fn set_availability(
        &self,
        owner: OwnerRef,
        start: NaiveDate,
        end: NaiveDate,
        fields: OverrideFields,
        actor: &Actor,
    ) -> Result<AvailabilityOverride, SchedulerError> {
        let span = validate_range(start, end)?;
        validate_prices(&fields)?;
        let mut written = self
            .write_ranges(
                "set availability",
                owner,
                Some(actor),
                &[span],
                ExactRange::FollowPolicy,
                |_, _| fields,
            )
            .await?;
        written
            .pop()
            .ok_or_else(|| SchedulerError::persistence("set availability", "no row written"))
    }

    /// Block every range in one transaction. In reject mode any overlap, including one
    /// between two ranges of the batch, fails the whole batch.
    pub async fn block_date_ranges(
        &self,
        owner: OwnerRef,
        ranges: &[(NaiveDate, NaiveDate)],
        reason: Option<OverrideReason>,
        actor: &Actor,
    ) -> Result<Vec<AvailabilityOverride>, SchedulerError> {
        if ranges.len() > MAX_BATCH_RANGES {
            return Err(SchedulerError::LimitExceeded("too many ranges in batch"));
        }
        let spans = ranges
            .iter()
            .map(|(start, end)| validate_range(*start, *end))
            .collect::<Result<Vec<_>, _>>()?;
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        let fields = OverrideFields::blocked(reason);
        self.write_ranges(
            "block date ranges",
            owner,
            Some(actor),
            &spans,
            ExactRange::FollowPolicy,
            |_, _| fields,
        )
        .await
    }

    /// Attach pricing to each range in one transaction. An exact-range row keeps its
    /// availability and reason and is updated under either policy; otherwise a new
    /// available row carries only the prices.
    pub async fn set_special_pricing(
        &self,
        owner: OwnerRef,
        ranges: &[PriceRange],
        actor: &Actor,
    ) -> Result<Vec<AvailabilityOverride>, SchedulerError> {
        if ranges.len() > MAX_BATCH_RANGES {
            return Err(SchedulerError::LimitExceeded("too many ranges in batch"));
        }
        let mut spans = Vec::with_capacity(ranges.len());
        for range in ranges {
            spans.push(validate_range(range.start, range.end)?);
            validate_prices(&OverrideFields {
                special_price: range.weekday_price,
                weekend_price: range.weekend_price,
                ..OverrideFields::default()
            })?;
        }
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        self.write_ranges("set special pricing", owner, Some(actor), &spans, ExactRange::Upsert, |i, existing| {
            let range = &ranges[i];
            let (is_available, reason) =
                existing.map_or((true, None), |o| (o.is_available, o.reason));
            OverrideFields {
                is_available,
                reason,
                special_price: range.weekday_price,
                weekend_price: range.weekend_price,
            }
        })
        .await
    }

    /// Seed one available range `[today, today + days_ahead]` for an owner with no rows.
    /// Returns `None` without writing when the owner already has overrides.
    pub async fn initialize_default_availability(
        &self,
        owner: OwnerRef,
        days_ahead: u32,
    ) -> Result<Option<AvailabilityOverride>, SchedulerError> {
        const OP: &str = "initialize default availability";
        let start = today();
        if days_ahead == 0 {
            return Err(SchedulerError::InvalidRange { start, end: start });
        }
        if days_ahead > MAX_DAYS_AHEAD {
            return Err(SchedulerError::LimitExceeded("days ahead too large"));
        }
        let end = start
            .checked_add_days(Days::new(days_ahead as u64))
            .ok_or(SchedulerError::LimitExceeded("date out of range"))?;
        let span = validate_range(start, end)?;
        self.authorize(owner, None, OP).await?;

        let set = self.store.get_or_create(owner);
        let mut guard = set.write().await;
        if !guard.is_empty() {
            return Ok(None);
        }
        let stamp = Stamp {
            at: now_ms(),
            by: None,
        };
        let event = plan_range(&guard, span, OverlapPolicy::Merge, ExactRange::Upsert, stamp, |_| {
            OverrideFields::available()
        })?;
        let record = event.record().clone();
        self.persist_and_apply(OP, &mut guard, Commit { events: vec![event] })
            .await?;
        info!("{OP}: {owner} open for {span}");
        Ok(Some(record))
    }

    /// Rewrite one override in place, range included. Reject mode checks the new range
    /// against every other row of the owner.
    pub async fn update_override(
        &self,
        override_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        fields: OverrideFields,
        actor: &Actor,
    ) -> Result<AvailabilityOverride, SchedulerError> {
        const OP: &str = "update override";
        let span = validate_range(start, end)?;
        validate_prices(&fields)?;
        let owner_id = self
            .store
            .owner_of(&override_id)
            .ok_or(SchedulerError::NotFound(override_id))?;
        let set = self
            .store
            .get(&owner_id)
            .ok_or(SchedulerError::NotFound(override_id))?;
        let owner = set.read().await.owner;
        self.authorize(owner, Some(actor), OP).await?;

        let mut guard = set.write().await;
        let existing = guard
            .get(override_id)
            .cloned()
            .ok_or(SchedulerError::NotFound(override_id))?;
        if self.policy.for_actor(Some(actor)) == OverlapPolicy::Reject
            && let Some(other) = find_overlap(&guard, &span, Some(override_id))
        {
            let err = SchedulerError::Overlap { existing: other.id };
            note_rejection(OP, owner, &err);
            return Err(err);
        }

        let stamp = Stamp {
            at: now_ms(),
            by: Some(actor.id),
        };
        let mut record = with_fields(existing, fields, stamp);
        record.span = span;
        let event = Event::OverrideUpdated {
            record: record.clone(),
        };
        self.persist_and_apply(OP, &mut guard, Commit { events: vec![event] })
            .await?;
        info!("{OP}: {override_id} on {owner} now {span}");
        Ok(record)
    }

    /// Shared body of the range writers: authorize, plan every range against a draft of
    /// the owner's rows, log the plan as one transaction, then apply it.
    async fn write_ranges<F>(
        &self,
        op: &'static str,
        owner: OwnerRef,
        actor: Option<&Actor>,
        spans: &[DateSpan],
        exact: ExactRange,
        fields: F,
    ) -> Result<Vec<AvailabilityOverride>, SchedulerError>
    where
        F: Fn(usize, Option<&AvailabilityOverride>) -> OverrideFields,
    {
        self.authorize(owner, actor, op).await?;
        let policy = self.policy.for_actor(actor);
        let stamp = Stamp {
            at: now_ms(),
            by: actor.map(|a| a.id),
        };

        let set = self.store.get_or_create(owner);
        let mut guard = set.write().await;

        let planned = if let [span] = spans {
            plan_range(&guard, *span, policy, exact, stamp, |e| fields(0, e)).map(|event| vec![event])
        } else {
            // Later ranges of the batch must see the earlier ones.
            let mut draft = OverrideSet::clone(&guard);
            spans
                .iter()
                .enumerate()
                .map(|(i, span)| {
                    let event = plan_range(&draft, *span, policy, exact, stamp, |e| fields(i, e))?;
                    draft.upsert(event.record().clone());
                    Ok(event)
                })
                .collect::<Result<Vec<_>, SchedulerError>>()
        };
        let events = planned.inspect_err(|e| note_rejection(op, owner, e))?;

        let records: Vec<AvailabilityOverride> =
            events.iter().map(|e| e.record().clone()).collect();
        self.persist_and_apply(op, &mut guard, Commit { events }).await?;
        info!(
            "{op}: {owner} wrote {} row(s) under {} policy",
            records.len(),
            policy.as_str()
        );
        Ok(records)
    }
}
