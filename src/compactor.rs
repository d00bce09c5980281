use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::directory::Directory;
use crate::engine::Scheduler;

/// How often the compactor looks at the override log.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite both logs once the override log has taken `threshold` appends since its last
/// compaction. Returns whether it compacted.
pub async fn compact_if_due(scheduler: &Scheduler, directory: &Directory, threshold: u64) -> bool {
    let appends = scheduler.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match scheduler.compact_store().await {
        Ok(rows) => info!("compacted after {appends} appends, {rows} overrides kept"),
        Err(e) => {
            error!("override log compaction failed: {e}");
            return false;
        }
    }
    if let Err(e) = directory.compact_journal().await {
        error!("directory journal compaction failed: {e}");
    }
    true
}

/// Background task that periodically compacts the logs.
pub async fn run_compactor(scheduler: Arc<Scheduler>, directory: Arc<Directory>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&scheduler, &directory, threshold).await;
    }
}
