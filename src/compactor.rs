use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL as snapshots once enough appends
/// have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// One compactor pass. Returns whether the log was rewritten.
pub async fn compact_if_needed(
    engine: &Engine,
    threshold: u64,
) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OwnerAuthorizer;
    use crate::clock::FixedClock;
    use crate::engine::{EngineSettings, NewResource};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::pricing::PricingRuleSet;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("campo_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn open(path: &PathBuf) -> Engine {
        Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            Arc::new(FixedClock::at("2025-06-01")),
            Arc::new(OwnerAuthorizer::new()),
            EngineSettings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn compacts_past_threshold_and_replays() {
        let path = test_wal_path("threshold.wal");
        let engine = open(&path);
        let rid = Ulid::new();
        engine
            .create_resource(NewResource {
                id: rid,
                owner: "club".into(),
                name: Some("Court 1".into()),
                sport: None,
                schedule: WeeklySchedule::uniform(
                    "09:00".parse().unwrap(),
                    "12:00".parse().unwrap(),
                ),
                pricing: PricingRuleSet::flat(Decimal::from(40), Decimal::from(56)),
            })
            .await
            .unwrap();

        assert!(!compact_if_needed(&engine, 100).await.unwrap());
        assert!(compact_if_needed(&engine, 2).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let before = engine.get_calendar_month(rid, "2025-06").await.unwrap();
        drop(engine);

        let reopened = open(&path);
        let after = reopened.get_calendar_month(rid, "2025-06").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(reopened.get_resource_info(rid).await.unwrap().owner, "club");
    }
}
