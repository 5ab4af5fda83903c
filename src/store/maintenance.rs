use chrono::{Duration as ChronoDuration, Local};
use sqlx::Connection;
use tracing::{error, info};

use super::StoreConnection;
use super::models::StoreStats;
use crate::error::StoreResult;

impl StoreConnection {
    pub async fn get_stats(&mut self) -> StoreResult<StoreStats> {
        let conn = self.live().await?;

        let favorites: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM favorites")
            .fetch_one(&mut *conn)
            .await?;
        let price_history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&mut *conn)
            .await?;
        let search_logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_logs")
            .fetch_one(&mut *conn)
            .await?;
        let price_alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_alerts")
            .fetch_one(&mut *conn)
            .await?;
        let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM last_search")
            .fetch_one(&mut *conn)
            .await?;

        Ok(StoreStats {
            favorites,
            price_history,
            search_logs,
            price_alerts,
            snapshots,
        })
    }

    /// Delete price history and search logs older than `retention_days`.
    ///
    /// Returns the number of rows removed.
    pub async fn cleanup_old_data(&mut self, retention_days: i64) -> StoreResult<u64> {
        let cutoff = (Local::now() - ChronoDuration::days(retention_days))
            .format("%Y-%m-%d")
            .to_string();

        let conn = self.live().await?;
        let mut tx = conn.begin().await?;
        let history = sqlx::query("DELETE FROM price_history WHERE recorded_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let logs = sqlx::query("DELETE FROM search_logs WHERE searched_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(cutoff = %cutoff, history, logs, "Old data removed");
        Ok(history + logs)
    }

    /// Rebuild indices and reclaim free pages
    pub async fn optimize(&mut self) -> StoreResult<()> {
        let conn = self.live().await?;
        let outcome = async {
            sqlx::query("REINDEX").execute(&mut *conn).await?;
            sqlx::query("VACUUM").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                info!("Database optimized (VACUUM completed)");
                Ok(())
            }
            Err(e) => {
                error!("Database optimization failed: {}", e);
                Err(e.into())
            }
        }
    }
}
