use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts a tenant's WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns the number of bookings written when a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match engine.compact_wal().await {
        Ok(bookings) => {
            info!("compacted WAL: {appends} appends folded into {bookings} bookings");
            Some(bookings)
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tidyslot_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal")).unwrap();
        let requester = Participant::Requester { id: 1 };
        for i in 0..3 {
            engine
                .create_booking(
                    requester,
                    NewBooking {
                        service_id: i,
                        scheduled_at: Some(1_700_000_000_000),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(compact_if_due(&engine, 10).await, None);
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert_eq!(compact_if_due(&engine, 3).await, Some(3));
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
