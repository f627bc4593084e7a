use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::db::Database;
use crate::models::TaskStatus;

/// Periodically purges cancelled tasks and rejected posts older than
/// `retention_days`. The first pass runs immediately.
pub async fn start_gc_task(db_path: String, every: Duration, retention_days: i64) {
    info!("[GC] Starting garbage collection task (every {:?}, {} day retention)", every, retention_days);

    let mut interval = interval(every);
    loop {
        interval.tick().await;
        info!("[GC] Running garbage collection...");

        let path = db_path.clone();
        // rusqlite connections are not Sync, so GC opens its own
        let result = tokio::task::spawn_blocking(move || {
            let db = match Database::new(&path) {
                Ok(d) => d,
                Err(e) => {
                    error!("[GC] Failed to open database: {}", e);
                    return;
                }
            };

            match db.gc_cancelled_tasks(retention_days) {
                Ok(0) => info!("[GC] No cancelled tasks to purge."),
                Ok(n) => info!("[GC] Purged {} cancelled tasks", n),
                Err(e) => error!("[GC] Failed to purge cancelled tasks: {}", e),
            }
            if let Ok(kept) = db.count_tasks_by_status(TaskStatus::Cancelled) {
                info!("[GC] {} cancelled tasks still within retention", kept);
            }

            match db.gc_rejected_posts(retention_days) {
                Ok(0) => {}
                Ok(n) => info!("[GC] Purged {} rejected posts", n),
                Err(e) => error!("[GC] Failed to purge rejected posts: {}", e),
            }
        })
        .await;

        if let Err(e) = result {
            error!("[GC] Task panicked: {}", e);
        }
    }
}
