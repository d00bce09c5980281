//! Collaborators the scheduler reads from but does not own: the owner store, the
//! reservation ledger and the administrative scope directory.
//!
//! [`Directory`] implements all three from in-memory maps. The server feeds it from the
//! marketplace's own records (owners, scope assignments, reservations) and journals every
//! change so a restart sees the same picture.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError(e.to_string())
    }
}

#[async_trait]
pub trait OwnerStore: Send + Sync {
    async fn get_owner(&self, owner_id: Ulid) -> Result<Option<OwnerRecord>, StoreError>;
}

#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Reservations of any status whose stay overlaps `[start, end)`.
    /// For a unit, reservations of all of its sub-units.
    async fn list_overlapping_reservations(
        &self,
        owner: OwnerRef,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;
}

#[async_trait]
pub trait ScopeDirectory: Send + Sync {
    async fn owner_belongs_to_scope(&self, owner_id: Ulid, scope_id: &str) -> Result<bool, StoreError>;
}

/// The three collaborator handles a scheduler is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub owners: Arc<dyn OwnerStore>,
    pub ledger: Arc<dyn ReservationLedger>,
    pub scopes: Arc<dyn ScopeDirectory>,
}

impl Collaborators {
    pub fn from_directory(directory: Arc<Directory>) -> Self {
        Self {
            owners: directory.clone(),
            ledger: directory.clone(),
            scopes: directory,
        }
    }
}

/// An owner as registered. The eligible sub-unit count of a unit is derived on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    pub id: Ulid,
    pub scope: OwnerScope,
    pub parent_id: Option<Ulid>,
    pub base_price: Money,
    pub is_available: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryEvent {
    OwnerUpserted(OwnerEntry),
    ScopeAssigned { owner_id: Ulid, scope_id: String },
    ReservationUpserted(Reservation),
}

enum JournalCommand {
    Append {
        event: DirectoryEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<DirectoryEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the journal file, so request tasks only wait on a channel.
async fn journal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let _ = response.send(wal.append(&event));
            }
            JournalCommand::Compact { events, response } => {
                let _ = response.send(wal.compact(&events));
            }
        }
    }
}

/// Sender side of the journal writer. The mutex keeps journal order and apply order equal.
struct Journal {
    tx: mpsc::Sender<JournalCommand>,
    order: Mutex<()>,
}

impl Journal {
    async fn send(&self, cmd: JournalCommand, rx: oneshot::Receiver<io::Result<()>>) -> Result<(), StoreError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| StoreError("directory journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError("directory journal writer dropped response".into()))??;
        Ok(())
    }
}

pub struct Directory {
    owners: DashMap<Ulid, OwnerEntry>,
    /// Unit → its sub-units.
    children: DashMap<Ulid, Vec<Ulid>>,
    scopes: DashMap<Ulid, HashSet<String>>,
    reservations: DashMap<Ulid, Reservation>,
    /// Sub-unit → reservation ids.
    by_sub_unit: DashMap<Ulid, Vec<Ulid>>,
    journal: Option<Journal>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Directory {
    /// Unjournaled directory; contents vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            owners: DashMap::new(),
            children: DashMap::new(),
            scopes: DashMap::new(),
            reservations: DashMap::new(),
            by_sub_unit: DashMap::new(),
            journal: None,
        }
    }

    /// Replay the journal at `path` (if any) and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events: Vec<DirectoryEvent> = Wal::replay(path)?;
        let mut directory = Self::in_memory();
        for event in &events {
            directory.apply(event);
        }
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(journal_writer_loop(Wal::open(path)?, rx));
        directory.journal = Some(Journal {
            tx,
            order: Mutex::new(()),
        });
        tracing::info!("directory replayed {} records from {}", events.len(), path.display());
        Ok(directory)
    }

    pub async fn upsert_owner(&self, entry: OwnerEntry) -> Result<(), StoreError> {
        if entry.base_price < 0 {
            return Err(StoreError(format!("owner {}: base price must not be negative", entry.id)));
        }
        match (entry.scope, entry.parent_id) {
            (OwnerScope::Unit, Some(_)) => {
                return Err(StoreError(format!("unit {} cannot have a parent", entry.id)));
            }
            (OwnerScope::SubUnit, None) => {
                return Err(StoreError(format!("sub-unit {} needs a parent unit", entry.id)));
            }
            (OwnerScope::SubUnit, Some(pid)) => {
                let parent_is_unit = self
                    .owners
                    .get(&pid)
                    .is_some_and(|p| p.scope == OwnerScope::Unit);
                if !parent_is_unit {
                    return Err(StoreError(format!("parent unit {pid} not registered")));
                }
            }
            (OwnerScope::Unit, None) => {
                if self
                    .owners
                    .get(&entry.id)
                    .is_some_and(|o| o.scope == OwnerScope::SubUnit)
                {
                    return Err(StoreError(format!("{} already registered as sub-unit", entry.id)));
                }
            }
        }
        self.record(DirectoryEvent::OwnerUpserted(entry)).await
    }

    pub async fn assign_scope(&self, owner_id: Ulid, scope_id: impl Into<String>) -> Result<(), StoreError> {
        if !self.owners.contains_key(&owner_id) {
            return Err(StoreError(format!("owner {owner_id} not registered")));
        }
        self.record(DirectoryEvent::ScopeAssigned {
            owner_id,
            scope_id: scope_id.into(),
        })
        .await
    }

    pub async fn upsert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if reservation.check_in >= reservation.check_out {
            return Err(StoreError(format!(
                "reservation {}: check-in {} not before check-out {}",
                reservation.id, reservation.check_in, reservation.check_out
            )));
        }
        let is_sub_unit = self
            .owners
            .get(&reservation.sub_unit_id)
            .is_some_and(|o| o.scope == OwnerScope::SubUnit);
        if !is_sub_unit {
            return Err(StoreError(format!(
                "sub-unit {} not registered",
                reservation.sub_unit_id
            )));
        }
        self.record(DirectoryEvent::ReservationUpserted(reservation)).await
    }

    /// Rewrite the journal as one record per live owner, scope assignment and reservation.
    pub async fn compact_journal(&self) -> Result<(), StoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        // No record may land between the snapshot and the rewrite.
        let _order = journal.order.lock().await;
        let mut events = Vec::new();
        // Units before sub-units so replay can resolve parents.
        let mut owners: Vec<OwnerEntry> = self.owners.iter().map(|e| e.value().clone()).collect();
        owners.sort_by_key(|o| (o.scope == OwnerScope::SubUnit, o.id));
        events.extend(owners.into_iter().map(DirectoryEvent::OwnerUpserted));
        for entry in self.scopes.iter() {
            for scope_id in entry.value() {
                events.push(DirectoryEvent::ScopeAssigned {
                    owner_id: *entry.key(),
                    scope_id: scope_id.clone(),
                });
            }
        }
        events.extend(
            self.reservations
                .iter()
                .map(|e| DirectoryEvent::ReservationUpserted(e.value().clone())),
        );

        let (response, rx) = oneshot::channel();
        journal
            .send(JournalCommand::Compact { events, response }, rx)
            .await
    }

    /// Journal `event`, then apply it.
    async fn record(&self, event: DirectoryEvent) -> Result<(), StoreError> {
        let Some(journal) = &self.journal else {
            self.apply(&event);
            return Ok(());
        };
        let _order = journal.order.lock().await;
        let (response, rx) = oneshot::channel();
        journal
            .send(
                JournalCommand::Append {
                    event: event.clone(),
                    response,
                },
                rx,
            )
            .await?;
        self.apply(&event);
        Ok(())
    }

    fn apply(&self, event: &DirectoryEvent) {
        match event {
            DirectoryEvent::OwnerUpserted(entry) => {
                let previous_parent = self.owners.get(&entry.id).and_then(|o| o.parent_id);
                if previous_parent != entry.parent_id {
                    if let Some(old) = previous_parent
                        && let Some(mut kids) = self.children.get_mut(&old)
                    {
                        kids.retain(|c| c != &entry.id);
                    }
                    if let Some(pid) = entry.parent_id {
                        self.children.entry(pid).or_default().push(entry.id);
                    }
                }
                self.owners.insert(entry.id, entry.clone());
            }
            DirectoryEvent::ScopeAssigned { owner_id, scope_id } => {
                self.scopes
                    .entry(*owner_id)
                    .or_default()
                    .insert(scope_id.clone());
            }
            DirectoryEvent::ReservationUpserted(reservation) => {
                let previous_room = self
                    .reservations
                    .get(&reservation.id)
                    .map(|r| r.sub_unit_id);
                if previous_room != Some(reservation.sub_unit_id) {
                    if let Some(old) = previous_room
                        && let Some(mut ids) = self.by_sub_unit.get_mut(&old)
                    {
                        ids.retain(|id| id != &reservation.id);
                    }
                    self.by_sub_unit
                        .entry(reservation.sub_unit_id)
                        .or_default()
                        .push(reservation.id);
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
        }
    }

    fn sub_units_of(&self, unit_id: &Ulid) -> Vec<Ulid> {
        self.children
            .get(unit_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn eligible_sub_units(&self, unit_id: &Ulid) -> u32 {
        self.sub_units_of(unit_id)
            .iter()
            .filter(|id| {
                self.owners
                    .get(id)
                    .is_some_and(|o| !o.is_deleted && o.is_available)
            })
            .count() as u32
    }

    fn reservations_of(&self, sub_unit_id: &Ulid, span: &DateSpan, out: &mut Vec<Reservation>) {
        let ids = self
            .by_sub_unit
            .get(sub_unit_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for id in ids {
            if let Some(r) = self.reservations.get(&id)
                && r.overlaps(span)
            {
                out.push(r.clone());
            }
        }
    }
}

#[async_trait]
impl OwnerStore for Directory {
    async fn get_owner(&self, owner_id: Ulid) -> Result<Option<OwnerRecord>, StoreError> {
        let Some(entry) = self.owners.get(&owner_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let eligible_sub_units = match entry.scope {
            OwnerScope::Unit => self.eligible_sub_units(&entry.id),
            OwnerScope::SubUnit => 0,
        };
        Ok(Some(OwnerRecord {
            id: entry.id,
            scope: entry.scope,
            parent_unit: entry.parent_id,
            base_price_per_night: entry.base_price,
            is_globally_available: entry.is_available,
            is_soft_deleted: entry.is_deleted,
            eligible_sub_units,
        }))
    }
}

#[async_trait]
impl ReservationLedger for Directory {
    async fn list_overlapping_reservations(
        &self,
        owner: OwnerRef,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        let span = DateSpan::try_new(start, end)
            .ok_or_else(|| StoreError(format!("empty reservation window {start}..{end}")))?;
        let mut out = Vec::new();
        match owner.scope {
            OwnerScope::SubUnit => self.reservations_of(&owner.id, &span, &mut out),
            OwnerScope::Unit => {
                for sub_unit in self.sub_units_of(&owner.id) {
                    self.reservations_of(&sub_unit, &span, &mut out);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ScopeDirectory for Directory {
    async fn owner_belongs_to_scope(&self, owner_id: Ulid, scope_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .scopes
            .get(&owner_id)
            .is_some_and(|scopes| scopes.contains(scope_id)))
    }
}
