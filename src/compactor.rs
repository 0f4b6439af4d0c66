use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Background task that compacts the WAL once `threshold` records have been
/// appended since the last compaction. Stops when the engine is dropped.
pub async fn run_compactor(engine: Weak<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let Some(engine) = engine.upgrade() else {
            debug!("engine dropped, compactor exiting");
            return;
        };
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appended, "WAL compaction done");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Start the compactor for `engine` on the current runtime.
pub fn spawn(engine: &Arc<Engine>, threshold: u64, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_compactor(Arc::downgrade(engine), threshold, every))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rollcall_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        let year = Ulid::new();
        engine.create_year(year, "2024/25", Span::new(0, 1_000)).await.unwrap();
        engine.create_teacher(Ulid::new(), None).await.unwrap();

        assert!(!compact_if_due(&engine, 3).await);
        engine.create_class(Ulid::new(), year, None, 5).await.unwrap();
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        assert_eq!(replayed.list_resources().len(), 2);
        assert!(replayed.get_year(&year).is_some());
    }

    #[tokio::test]
    async fn background_task_compacts_and_stops_with_engine() {
        let path = test_wal_path("background.wal");
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap());
        let handle = spawn(&engine, 2, Duration::from_millis(10));

        let year = Ulid::new();
        engine.create_year(year, "2024/25", Span::new(0, 1_000)).await.unwrap();
        engine.create_teacher(Ulid::new(), None).await.unwrap();

        let mut compacted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if engine.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
        }
        assert!(compacted, "compactor never ran");

        drop(engine);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("compactor outlived its engine")
            .unwrap();
    }
}
