use chrono::NaiveDate;
use ulid::Ulid;

use crate::directory::StoreError;

#[derive(Debug)]
pub enum SchedulerError {
    /// Owner missing, soft-deleted, declared with the wrong scope, or outside the caller's
    /// administrative scope. These cases are deliberately indistinguishable.
    NotFound(Ulid),
    /// Reject-mode write would overlap the named existing override.
    Overlap { existing: Ulid },
    /// `start >= end`.
    InvalidRange { start: NaiveDate, end: NaiveDate },
    /// Calendar request for a month that does not exist.
    InvalidMonth { year: i32, month: u32 },
    LimitExceeded(&'static str),
    /// Storage or collaborator failure. Nothing from the failed operation was committed.
    PersistenceFailure { op: &'static str, detail: String },
}

impl SchedulerError {
    pub(crate) fn persistence(op: &'static str, detail: impl ToString) -> Self {
        SchedulerError::PersistenceFailure {
            op,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn from_store(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |e| SchedulerError::persistence(op, e)
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::NotFound(id) => write!(f, "not found: {id}"),
            SchedulerError::Overlap { existing } => {
                write!(f, "range overlaps existing override: {existing}")
            }
            SchedulerError::InvalidRange { start, end } => {
                write!(f, "invalid range: {start} must be before {end}")
            }
            SchedulerError::InvalidMonth { year, month } => {
                write!(f, "invalid range: no month {month} in year {year}")
            }
            SchedulerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            SchedulerError::PersistenceFailure { op, detail } => {
                write!(f, "{op} failed: {detail}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}
