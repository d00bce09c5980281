use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::overlap::{blocked_during, validate_stay};
use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Is the owner bookable for the nights `[check_in, check_out)`?
    ///
    /// A sub-unit needs no blocking override and no live reservation over the stay. A unit
    /// needs no unit-level block and fewer distinct booked sub-units than it has eligible
    /// ones. Reads the ledger without holding any lock; the booking path re-checks.
    pub async fn is_available(
        &self,
        owner_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, SchedulerError> {
        const OP: &str = "availability check";
        let span = validate_stay(check_in, check_out)?;
        let owner = self.load_owner(owner_id, OP).await?;
        if !owner.is_active() {
            tracing::debug!("{owner_id} inactive");
            return Ok(false);
        }
        if owner.scope == OwnerScope::Unit && owner.eligible_sub_units == 0 {
            return Ok(false);
        }

        if let Some(set) = self.store.get(&owner_id) {
            let guard = set.read().await;
            if blocked_during(&guard, &span) {
                tracing::debug!("{owner_id} blocked during {span}");
                return Ok(false);
            }
        }

        let reservations = self
            .collab
            .ledger
            .list_overlapping_reservations(owner.owner_ref(), check_in, check_out)
            .await
            .map_err(SchedulerError::from_store(OP))?;
        let mut live = reservations
            .iter()
            .filter(|r| r.status.occupies() && r.overlaps(&span));

        match owner.scope {
            OwnerScope::SubUnit => Ok(live.next().is_none()),
            OwnerScope::Unit => {
                let booked: HashSet<Ulid> = live.map(|r| r.sub_unit_id).collect();
                Ok((booked.len() as u32) < owner.eligible_sub_units)
            }
        }
    }

    /// All overrides of an owner, ordered by start date.
    pub async fn list_overrides(&self, owner_id: Ulid) -> Vec<AvailabilityOverride> {
        let Some(set) = self.store.get(&owner_id) else {
            return Vec::new();
        };
        let guard = set.read().await;
        guard.overrides.clone()
    }

    pub async fn get_override(&self, override_id: Ulid) -> Result<AvailabilityOverride, SchedulerError> {
        let owner_id = self
            .store
            .owner_of(&override_id)
            .ok_or(SchedulerError::NotFound(override_id))?;
        let set = self
            .store
            .get(&owner_id)
            .ok_or(SchedulerError::NotFound(override_id))?;
        let guard = set.read().await;
        guard
            .get(override_id)
            .cloned()
            .ok_or(SchedulerError::NotFound(override_id))
    }
}
