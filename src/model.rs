use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Audit instants only; calendar data is date-based.
pub type Ms = i64;

/// Price in minor currency units.
pub type Money = i64;

/// A range of calendar dates.
///
/// Two readings of the same pair coexist and both are relied upon:
/// - overlap between override rows is half-open, `[start, end)` (see [`DateSpan::overlaps`]);
/// - calendar membership and price resolution are closed, `[start, end]`
///   (see [`DateSpan::covers_day`]).
///
/// Mutation policy was written against the first, pricing and the calendar against the
/// second. Changing one reading without the other shifts which row governs the `end` day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Number of nights in `[start, end)`.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Half-open intersection: `[a1, a2)` and `[b1, b2)` overlap iff `a1 < b2 && b1 < a2`.
    /// Ranges that merely touch (`a2 == b1`) do not overlap.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Closed membership: `start <= day <= end`. Note the `end` day is included here but
    /// excluded by [`DateSpan::overlaps`].
    pub fn covers_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Night membership for stays: `start <= day < end`.
    pub fn contains_night(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Every night in `[start, end)`.
    pub fn nights_iter(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Friday and Saturday nights carry weekend pricing.
pub fn is_weekend_night(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Fri | Weekday::Sat)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerScope {
    /// Whole property.
    Unit,
    /// A single bookable room of a unit.
    SubUnit,
}

impl OwnerScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerScope::Unit => "unit",
            OwnerScope::SubUnit => "sub_unit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unit" => Some(OwnerScope::Unit),
            "sub_unit" | "subunit" | "room" => Some(OwnerScope::SubUnit),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit or sub-unit an override belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub scope: OwnerScope,
    pub id: Ulid,
}

impl OwnerRef {
    pub fn unit(id: Ulid) -> Self {
        Self { scope: OwnerScope::Unit, id }
    }

    pub fn sub_unit(id: Ulid) -> Self {
        Self { scope: OwnerScope::SubUnit, id }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

/// Informational tag on an override. Never consulted by resolution logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverrideReason {
    Booked,
    Maintenance,
    OwnerBlocked,
    SeasonallyClosed,
    Other,
}

impl OverrideReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideReason::Booked => "booked",
            OverrideReason::Maintenance => "maintenance",
            OverrideReason::OwnerBlocked => "owner_blocked",
            OverrideReason::SeasonallyClosed => "seasonally_closed",
            OverrideReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "booked" => Some(OverrideReason::Booked),
            "maintenance" => Some(OverrideReason::Maintenance),
            "owner_blocked" | "ownerblocked" => Some(OverrideReason::OwnerBlocked),
            "seasonally_closed" | "seasonallyclosed" => Some(OverrideReason::SeasonallyClosed),
            "other" => Some(OverrideReason::Other),
            _ => None,
        }
    }
}

/// One explicit availability/pricing exception for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub id: Ulid,
    pub owner: OwnerRef,
    pub span: DateSpan,
    pub is_available: bool,
    pub reason: Option<OverrideReason>,
    /// Applies to every night of the range, weekends included.
    pub special_price: Option<Money>,
    /// Applies to Friday/Saturday nights when `special_price` is unset.
    pub weekend_price: Option<Money>,
    pub created_at: Ms,
    pub updated_at: Ms,
    /// `None` for writes made by the system rather than an administrator.
    pub updated_by: Option<Ulid>,
}

/// The mutable fields of an override, as supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverrideFields {
    pub is_available: bool,
    pub reason: Option<OverrideReason>,
    pub special_price: Option<Money>,
    pub weekend_price: Option<Money>,
}

impl OverrideFields {
    pub fn available() -> Self {
        Self {
            is_available: true,
            ..Self::default()
        }
    }

    pub fn blocked(reason: Option<OverrideReason>) -> Self {
        Self {
            is_available: false,
            reason,
            ..Self::default()
        }
    }
}

/// All overrides of one owner, sorted by `(span.start, id)`.
///
/// The sort key doubles as the tie-break for overlapping rows: among rows covering a day,
/// the last one in storage order has the most recent start, and the highest id among equal
/// starts.
#[derive(Debug, Clone)]
pub struct OverrideSet {
    pub owner: OwnerRef,
    pub overrides: Vec<AvailabilityOverride>,
}

impl OverrideSet {
    pub fn new(owner: OwnerRef) -> Self {
        Self {
            owner,
            overrides: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Insert maintaining `(start, id)` order.
    pub fn insert(&mut self, record: AvailabilityOverride) {
        let key = (record.span.start, record.id);
        let pos = self
            .overrides
            .binary_search_by(|o| (o.span.start, o.id).cmp(&key))
            .unwrap_or_else(|e| e);
        self.overrides.insert(pos, record);
    }

    /// Replace the row with the same id (its span may have moved), or insert it.
    pub fn upsert(&mut self, record: AvailabilityOverride) {
        self.remove(record.id);
        self.insert(record);
    }

    fn remove(&mut self, id: Ulid) -> Option<AvailabilityOverride> {
        let pos = self.overrides.iter().position(|o| o.id == id)?;
        Some(self.overrides.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&AvailabilityOverride> {
        self.overrides.iter().find(|o| o.id == id)
    }

    /// Row whose range is exactly `span`, if any. Upserts key on this.
    pub fn exact_match(&self, span: &DateSpan) -> Option<&AvailabilityOverride> {
        let from = self.overrides.partition_point(|o| o.span.start < span.start);
        self.overrides[from..]
            .iter()
            .take_while(|o| o.span.start == span.start)
            .filter(|o| o.span.end == span.end)
            .last()
    }

    /// Rows whose range overlaps `query` under half-open semantics.
    /// Binary search skips rows starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &AvailabilityOverride> {
        let right_bound = self.overrides.partition_point(|o| o.span.start < query.end);
        let start = query.start;
        self.overrides[..right_bound]
            .iter()
            .filter(move |o| o.span.end > start)
    }

    /// Rows whose closed range contains `day`, in storage order.
    pub fn covering(&self, day: NaiveDate) -> impl Iterator<Item = &AvailabilityOverride> {
        let right_bound = self.overrides.partition_point(|o| o.span.start <= day);
        self.overrides[..right_bound]
            .iter()
            .filter(move |o| o.span.end >= day)
    }

    /// The governing override for `day`: most recent start wins, highest id breaks ties.
    pub fn governing(&self, day: NaiveDate) -> Option<&AvailabilityOverride> {
        self.covering(day).last()
    }
}

/// Log record variants. One committed transaction is a [`Commit`] of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OverrideInserted { record: AvailabilityOverride },
    OverrideUpdated { record: AvailabilityOverride },
}

impl Event {
    pub fn record(&self) -> &AvailabilityOverride {
        match self {
            Event::OverrideInserted { record } | Event::OverrideUpdated { record } => record,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::OverrideInserted { .. } => "insert",
            Event::OverrideUpdated { .. } => "update",
        }
    }
}

/// The unit of atomicity: all events of a commit are replayed together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub events: Vec<Event>,
}

// ── Collaborator projections ─────────────────────────────────────

/// Flat read projection of a unit or sub-unit as the owner store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: Ulid,
    pub scope: OwnerScope,
    /// Set for sub-units.
    pub parent_unit: Option<Ulid>,
    pub base_price_per_night: Money,
    pub is_globally_available: bool,
    pub is_soft_deleted: bool,
    /// Units only: sub-units that are neither soft-deleted nor individually unavailable.
    pub eligible_sub_units: u32,
}

impl OwnerRecord {
    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef {
            scope: self.scope,
            id: self.id,
        }
    }

    /// Not soft-deleted and globally available.
    pub fn is_active(&self) -> bool {
        !self.is_soft_deleted && self.is_globally_available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Every status except `Cancelled` holds its nights.
    pub fn occupies(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "checked_in" | "checkedin" => Some(ReservationStatus::CheckedIn),
            "completed" => Some(ReservationStatus::Completed),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

/// A guest stay as the booking ledger reports it. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub sub_unit_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: ReservationStatus,
}

impl Reservation {
    /// Half-open stay overlap with `span`.
    pub fn overlaps(&self, span: &DateSpan) -> bool {
        self.check_in < span.end && span.start < self.check_out
    }

    /// True if the guest sleeps there on the night of `day`.
    pub fn occupies_night(&self, day: NaiveDate) -> bool {
        self.status.occupies() && self.check_in <= day && day < self.check_out
    }
}

// ── Operation inputs and results ─────────────────────────────────

/// Who is calling a mutation, and within which administrative scope (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub scope_id: Option<String>,
}

impl Actor {
    pub fn unscoped(id: Ulid) -> Self {
        Self { id, scope_id: None }
    }

    pub fn scoped(id: Ulid, scope_id: impl Into<String>) -> Self {
        Self {
            id,
            scope_id: Some(scope_id.into()),
        }
    }
}

/// One range of a special-pricing batch. `weekday_price` is stored as the override's
/// `special_price` and therefore applies to every night of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub weekday_price: Option<Money>,
    pub weekend_price: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub is_available: bool,
    pub is_booked: bool,
    pub is_weekend: bool,
    pub price: Money,
    pub reason: Option<OverrideReason>,
    /// The governing override, if one covers the day.
    pub override_id: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightPrice {
    pub date: NaiveDate,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub owner_id: Ulid,
    pub nights: Vec<NightPrice>,
    pub total: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn record(start: NaiveDate, end: NaiveDate) -> AvailabilityOverride {
        AvailabilityOverride {
            id: Ulid::new(),
            owner: OwnerRef::sub_unit(Ulid::nil()),
            span: DateSpan::new(start, end),
            is_available: true,
            reason: None,
            special_price: None,
            weekend_price: None,
            created_at: 0,
            updated_at: 0,
            updated_by: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = DateSpan::new(d(2024, 1, 1), d(2024, 1, 4));
        assert_eq!(s.nights(), 3);
        assert!(s.contains_night(d(2024, 1, 1)));
        assert!(!s.contains_night(d(2024, 1, 4))); // checkout day
        assert!(s.covers_day(d(2024, 1, 4))); // closed for calendar membership
        assert_eq!(
            s.nights_iter().collect::<Vec<_>>(),
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3)]
        );
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(DateSpan::try_new(d(2024, 1, 2), d(2024, 1, 2)).is_none());
        assert!(DateSpan::try_new(d(2024, 1, 3), d(2024, 1, 2)).is_none());
        assert!(DateSpan::try_new(d(2024, 1, 1), d(2024, 1, 2)).is_some());
    }

    #[test]
    fn span_overlap() {
        let a = DateSpan::new(d(2024, 1, 1), d(2024, 1, 10));
        let b = DateSpan::new(d(2024, 1, 5), d(2024, 1, 15));
        let c = DateSpan::new(d(2024, 1, 10), d(2024, 1, 20));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn weekend_nights_are_friday_and_saturday() {
        // 2024-12-20 is a Friday.
        assert!(is_weekend_night(d(2024, 12, 20)));
        assert!(is_weekend_night(d(2024, 12, 21)));
        assert!(!is_weekend_night(d(2024, 12, 22)));
        assert!(!is_weekend_night(d(2024, 12, 19)));
    }

    #[test]
    fn set_keeps_start_order() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        set.insert(record(d(2024, 3, 1), d(2024, 3, 5)));
        set.insert(record(d(2024, 1, 1), d(2024, 1, 5)));
        set.insert(record(d(2024, 2, 1), d(2024, 2, 5)));
        let starts: Vec<_> = set.overrides.iter().map(|o| o.span.start).collect();
        assert_eq!(starts, vec![d(2024, 1, 1), d(2024, 2, 1), d(2024, 3, 1)]);
    }

    #[test]
    fn upsert_moves_row_when_span_changes() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        let mut moving = record(d(2024, 1, 1), d(2024, 1, 5));
        set.insert(moving.clone());
        set.insert(record(d(2024, 2, 1), d(2024, 2, 5)));

        moving.span = DateSpan::new(d(2024, 3, 1), d(2024, 3, 2));
        set.upsert(moving.clone());
        assert_eq!(set.len(), 2);
        assert_eq!(set.overrides[1].id, moving.id);
    }

    #[test]
    fn exact_match_ignores_partial_overlap() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        let target = record(d(2024, 1, 1), d(2024, 1, 10));
        set.insert(record(d(2024, 1, 1), d(2024, 1, 9)));
        set.insert(target.clone());
        set.insert(record(d(2024, 1, 2), d(2024, 1, 10)));

        let hit = set.exact_match(&DateSpan::new(d(2024, 1, 1), d(2024, 1, 10)));
        assert_eq!(hit.map(|o| o.id), Some(target.id));
        assert!(set
            .exact_match(&DateSpan::new(d(2024, 1, 1), d(2024, 1, 11)))
            .is_none());
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        set.insert(record(d(2024, 1, 1), d(2024, 1, 10)));
        let hits: Vec<_> = set
            .overlapping(&DateSpan::new(d(2024, 1, 10), d(2024, 1, 12)))
            .collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        set.insert(record(d(2024, 1, 1), d(2024, 1, 3)));
        let mid = record(d(2024, 1, 8), d(2024, 1, 20));
        set.insert(mid.clone());
        set.insert(record(d(2024, 2, 1), d(2024, 2, 3)));

        let hits: Vec<_> = set
            .overlapping(&DateSpan::new(d(2024, 1, 10), d(2024, 1, 12)))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, mid.id);
    }

    #[test]
    fn covering_includes_end_day() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        set.insert(record(d(2024, 1, 1), d(2024, 1, 10)));
        assert_eq!(set.covering(d(2024, 1, 10)).count(), 1);
        assert_eq!(set.covering(d(2024, 1, 11)).count(), 0);
        assert_eq!(set.covering(d(2023, 12, 31)).count(), 0);
    }

    #[test]
    fn governing_prefers_latest_start_then_highest_id() {
        let mut set = OverrideSet::new(OwnerRef::sub_unit(Ulid::nil()));
        let wide = record(d(2024, 12, 1), d(2024, 12, 31));
        let narrow = record(d(2024, 12, 24), d(2024, 12, 26));
        set.insert(narrow.clone());
        set.insert(wide.clone());

        assert_eq!(set.governing(d(2024, 12, 25)).map(|o| o.id), Some(narrow.id));
        assert_eq!(set.governing(d(2024, 12, 27)).map(|o| o.id), Some(wide.id));

        // Same start: higher id wins regardless of insertion order.
        let a = record(d(2025, 1, 1), d(2025, 1, 5));
        let b = record(d(2025, 1, 1), d(2025, 1, 8));
        let (lo, hi) = if a.id < b.id { (a, b) } else { (b, a) };
        set.insert(hi.clone());
        set.insert(lo);
        assert_eq!(set.governing(d(2025, 1, 2)).map(|o| o.id), Some(hi.id));
    }

    #[test]
    fn reservation_night_occupancy() {
        let r = Reservation {
            id: Ulid::new(),
            sub_unit_id: Ulid::new(),
            check_in: d(2024, 5, 1),
            check_out: d(2024, 5, 3),
            status: ReservationStatus::Confirmed,
        };
        assert!(r.occupies_night(d(2024, 5, 1)));
        assert!(r.occupies_night(d(2024, 5, 2)));
        assert!(!r.occupies_night(d(2024, 5, 3)));

        let cancelled = Reservation {
            status: ReservationStatus::Cancelled,
            ..r
        };
        assert!(!cancelled.occupies_night(d(2024, 5, 1)));
    }

    #[test]
    fn label_parsing_round_trips() {
        for reason in [
            OverrideReason::Booked,
            OverrideReason::Maintenance,
            OverrideReason::OwnerBlocked,
            OverrideReason::SeasonallyClosed,
            OverrideReason::Other,
        ] {
            assert_eq!(OverrideReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(OwnerScope::parse("SubUnit"), Some(OwnerScope::SubUnit));
        assert_eq!(ReservationStatus::parse("canceled"), Some(ReservationStatus::Cancelled));
        assert_eq!(OwnerScope::parse("floor"), None);
    }

    #[test]
    fn commit_serialization_roundtrip() {
        let commit = Commit {
            events: vec![Event::OverrideInserted {
                record: record(d(2024, 1, 1), d(2024, 1, 2)),
            }],
        };
        let bytes = bincode::serialize(&commit).unwrap();
        let decoded: Commit = bincode::deserialize(&bytes).unwrap();
        assert_eq!(commit, decoded);
    }
}
