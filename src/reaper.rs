use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};
use crate::model::Ms;

/// Release every hold that expired by `now`. Returns how many were released.
pub async fn reap_expired_holds(engine: &Engine, now: Ms) -> usize {
    let mut reaped = 0;
    for (hold_id, room_id) in engine.collect_expired_holds(now) {
        match engine.release_hold(hold_id).await {
            Ok(_) => {
                reaped += 1;
                info!("reaped expired hold {hold_id} on room {room_id}");
            }
            // Confirmed or released since we looked.
            Err(e) => debug!("reaper skip {hold_id}: {e}"),
        }
    }
    if reaped > 0 {
        metrics::counter!(crate::observability::HOLDS_REAPED_TOTAL).increment(reaped as u64);
    }
    reaped
}

/// Background task that periodically cleans up expired holds.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        reap_expired_holds(&engine, now_ms()).await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
