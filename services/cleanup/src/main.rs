//! Retention cleanup worker.
//!
//! Deletes exposure records whose `created_at` has fallen past the retention
//! horizon. Runs once by default; with `CLEANUP_INTERVAL` set, stays up and
//! sweeps on that cadence.

use anyhow::Context;
use chrono::Utc;
use std::time::Duration;
use tekserver_core::envconfig;
use tekserver_storage::exposure::ExposureStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tekserver_core::logging::init();

    let db_path = envconfig::string_var("DB_PATH", "tekserver.db");
    // 14 days of matching relevance plus a safety day.
    let ttl = envconfig::duration_secs_var("CLEANUP_TTL", 15 * 86_400);
    let interval_secs: u64 = envconfig::parse_var("CLEANUP_INTERVAL", 0);

    let mut store = ExposureStore::open(&db_path).context("unable to open exposure store")?;

    loop {
        let horizon = Utc::now() - ttl;
        let deleted = store
            .delete_exposures_before(horizon)
            .context("cleanup sweep failed")?;
        info!(deleted, horizon = %horizon, "cleanup sweep complete");

        if interval_secs == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(interval_secs)).await;
    }
}
