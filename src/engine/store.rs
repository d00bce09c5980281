use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedOverrideSet = Arc<RwLock<OverrideSet>>;

/// Durable override rows, grouped per owner.
///
/// Each owner's rows live behind their own lock; writers hold it for the whole
/// plan → log → apply sequence of a transaction.
pub struct IntervalStore {
    owners: DashMap<Ulid, SharedOverrideSet>,
    /// Override id → owner id.
    override_index: DashMap<Ulid, Ulid>,
}

impl Default for IntervalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalStore {
    pub fn new() -> Self {
        Self {
            owners: DashMap::new(),
            override_index: DashMap::new(),
        }
    }

    /// Build from replayed transactions. Rows are applied in log order, so a later
    /// update of the same id replaces the earlier version.
    pub fn from_commits(commits: &[Commit]) -> Self {
        let mut sets: HashMap<Ulid, OverrideSet> = HashMap::new();
        let store = Self::new();
        for commit in commits {
            for event in &commit.events {
                let record = event.record();
                let set = sets
                    .entry(record.owner.id)
                    .or_insert_with(|| OverrideSet::new(record.owner));
                set.upsert(record.clone());
                store.override_index.insert(record.id, record.owner.id);
            }
        }
        for (owner_id, set) in sets {
            store.owners.insert(owner_id, Arc::new(RwLock::new(set)));
        }
        store
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn override_count(&self) -> usize {
        self.override_index.len()
    }

    pub fn get(&self, owner_id: &Ulid) -> Option<SharedOverrideSet> {
        self.owners.get(owner_id).map(|e| e.value().clone())
    }

    /// The owner's set, created empty on first write.
    pub fn get_or_create(&self, owner: OwnerRef) -> SharedOverrideSet {
        self.owners
            .entry(owner.id)
            .or_insert_with(|| Arc::new(RwLock::new(OverrideSet::new(owner))))
            .value()
            .clone()
    }

    pub fn owner_ids(&self) -> Vec<Ulid> {
        self.owners.iter().map(|e| *e.key()).collect()
    }

    pub fn owner_of(&self, override_id: &Ulid) -> Option<Ulid> {
        self.override_index.get(override_id).map(|e| *e.value())
    }

    /// Apply one committed event to a set the caller holds the write lock on.
    pub fn apply_event(&self, set: &mut OverrideSet, event: &Event) {
        let record = event.record();
        match event {
            Event::OverrideInserted { .. } => set.insert(record.clone()),
            Event::OverrideUpdated { .. } => set.upsert(record.clone()),
        }
        self.override_index.insert(record.id, record.owner.id);
    }

    /// Every row of every owner as one transaction, for log compaction.
    pub async fn snapshot(&self) -> Commit {
        let mut events = Vec::with_capacity(self.override_count());
        let mut owner_ids = self.owner_ids();
        owner_ids.sort();
        for owner_id in owner_ids {
            let Some(set) = self.get(&owner_id) else {
                continue;
            };
            let guard = set.read().await;
            events.extend(guard.overrides.iter().map(|record| Event::OverrideInserted {
                record: record.clone(),
            }));
        }
        Commit { events }
    }
}
