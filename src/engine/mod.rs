mod calendar;
mod error;
mod mutations;
mod overlap;
mod pricing;
mod queries;
mod store;

pub use error::SchedulerError;
pub use overlap::find_overlap;
pub use pricing::resolve_night_price;
pub use store::{IntervalStore, SharedOverrideSet};

use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::directory::Collaborators;
use crate::limits::MAX_SCOPE_ID_LEN;
use crate::model::*;
use crate::wal::Wal;

/// What a write does when its range overlaps an existing override without matching it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Insert alongside; readers pick the governing row.
    Merge,
    /// Refuse with [`SchedulerError::Overlap`].
    Reject,
}

impl OverlapPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPolicy::Merge => "merge",
            OverlapPolicy::Reject => "reject",
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(OverlapPolicy::Merge),
            "reject" => Ok(OverlapPolicy::Reject),
            other => Err(format!("unknown overlap policy '{other}' (expected merge or reject)")),
        }
    }
}

/// Policy per caller kind: administrators acting inside a scope get `scoped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub unscoped: OverlapPolicy,
    pub scoped: OverlapPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            unscoped: OverlapPolicy::Merge,
            scoped: OverlapPolicy::Reject,
        }
    }
}

impl PolicyConfig {
    pub fn uniform(policy: OverlapPolicy) -> Self {
        Self {
            unscoped: policy,
            scoped: policy,
        }
    }

    pub fn for_actor(&self, actor: Option<&Actor>) -> OverlapPolicy {
        match actor {
            Some(Actor {
                scope_id: Some(_), ..
            }) => self.scoped,
            _ => self.unscoped,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            // Flush what we have before compaction or stats see the log.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so buffered bytes of a failed
    // batch cannot ride along with the next one.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let _ = response.send(wal.compact(&[snapshot]));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { commit, response } => {
            let result = wal.append(&commit);
            let _ = response.send(result);
        }
    }
}

/// The availability scheduler: override storage plus the operations over it.
pub struct Scheduler {
    pub(super) store: IntervalStore,
    wal_tx: mpsc::Sender<WalCommand>,
    pub(super) collab: Collaborators,
    pub(super) policy: PolicyConfig,
}

impl Scheduler {
    /// Replay `wal_path` and start the writer task. Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        collaborators: Collaborators,
        policy: PolicyConfig,
    ) -> io::Result<Self> {
        let commits: Vec<Commit> = Wal::replay(&wal_path)?;
        let store = IntervalStore::from_commits(&commits);
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        tracing::info!(
            "replayed {} transactions: {} overrides across {} owners",
            commits.len(),
            store.override_count(),
            store.owner_count()
        );
        metrics::gauge!(crate::observability::OWNERS_LOADED).set(store.owner_count() as f64);

        Ok(Self {
            store,
            wal_tx,
            collab: collaborators,
            policy,
        })
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy
    }

    pub fn store(&self) -> &IntervalStore {
        &self.store
    }

    /// Write one transaction to the WAL via the background group-commit writer.
    async fn wal_commit(&self, op: &'static str, commit: &Commit) -> Result<(), SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulerError::persistence(op, "WAL writer shut down"))?;
        rx.await
            .map_err(|_| SchedulerError::persistence(op, "WAL writer dropped response"))?
            .map_err(|e| {
                tracing::error!("{op}: WAL append failed: {e}");
                SchedulerError::persistence(op, e)
            })
    }

    /// Log the transaction, then apply it to the owner's rows. Nothing is applied if the
    /// append fails. The caller holds the owner's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        op: &'static str,
        set: &mut OverrideSet,
        commit: Commit,
    ) -> Result<(), SchedulerError> {
        if commit.events.is_empty() {
            return Ok(());
        }
        self.wal_commit(op, &commit).await?;
        for event in &commit.events {
            self.store.apply_event(set, event);
            metrics::counter!(crate::observability::OVERRIDE_WRITES_TOTAL, "kind" => event.label())
                .increment(1);
        }
        metrics::gauge!(crate::observability::OWNERS_LOADED).set(self.store.owner_count() as f64);
        Ok(())
    }

    /// Rewrite the WAL as a single snapshot transaction of the current rows.
    pub async fn compact_store(&self) -> Result<usize, SchedulerError> {
        const OP: &str = "compact store";
        let snapshot = self.store.snapshot().await;
        let rows = snapshot.events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                snapshot,
                response: tx,
            })
            .await
            .map_err(|_| SchedulerError::persistence(OP, "WAL writer shut down"))?;
        rx.await
            .map_err(|_| SchedulerError::persistence(OP, "WAL writer dropped response"))?
            .map_err(|e| SchedulerError::persistence(OP, e))?;
        tracing::info!("compacted WAL to {rows} overrides");
        Ok(rows)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub(super) async fn load_owner(
        &self,
        owner_id: Ulid,
        op: &'static str,
    ) -> Result<OwnerRecord, SchedulerError> {
        self.collab
            .owners
            .get_owner(owner_id)
            .await
            .map_err(SchedulerError::from_store(op))?
            .ok_or(SchedulerError::NotFound(owner_id))
    }

    /// Resolve a mutation target. Missing, soft-deleted, wrong-scope and out-of-scope owners
    /// all read as `NotFound`.
    pub(super) async fn authorize(
        &self,
        owner: OwnerRef,
        actor: Option<&Actor>,
        op: &'static str,
    ) -> Result<OwnerRecord, SchedulerError> {
        let record = self.load_owner(owner.id, op).await?;
        if record.is_soft_deleted || record.scope != owner.scope {
            warn!("{op}: {owner} is deleted or not a {}", owner.scope);
            return Err(SchedulerError::NotFound(owner.id));
        }
        if let Some(scope_id) = actor.and_then(|a| a.scope_id.as_deref()) {
            if scope_id.len() > MAX_SCOPE_ID_LEN {
                return Err(SchedulerError::LimitExceeded("scope id too long"));
            }
            let belongs = self
                .collab
                .scopes
                .owner_belongs_to_scope(owner.id, scope_id)
                .await
                .map_err(SchedulerError::from_store(op))?;
            if !belongs {
                warn!("{op}: {owner} is outside scope {scope_id}");
                return Err(SchedulerError::NotFound(owner.id));
            }
        }
        Ok(record)
    }
}
