use sqlx::Connection;
use tracing::info;

use super::StoreConnection;
use super::models::{PriceAlert, now_stamp};
use crate::error::StoreResult;
use crate::model::RouteKey;

impl StoreConnection {
    /// Create an active, unwatched alert; returns the new id
    pub async fn add_price_alert(
        &mut self,
        route: &RouteKey,
        return_date: Option<&str>,
        target_price: i64,
    ) -> StoreResult<i64> {
        let conn = self.live().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO price_alerts
                (origin, destination, departure_date, return_date, target_price, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&route.origin)
        .bind(&route.destination)
        .bind(&route.departure_date)
        .bind(return_date)
        .bind(target_price)
        .bind(now_stamp())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Alerts still waiting for their target: active and not yet triggered
    pub async fn get_active_alerts(&mut self) -> StoreResult<Vec<PriceAlert>> {
        let conn = self.live().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM price_alerts
            WHERE is_active = 1 AND triggered = 0
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(PriceAlert::from_row).collect())
    }

    pub async fn get_all_alerts(&mut self) -> StoreResult<Vec<PriceAlert>> {
        let conn = self.live().await?;
        let rows = sqlx::query("SELECT * FROM price_alerts ORDER BY created_at DESC, id DESC")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.iter().map(PriceAlert::from_row).collect())
    }

    pub async fn delete_alert(&mut self, id: i64) -> StoreResult<bool> {
        let conn = self.live().await?;
        let result = sqlx::query("DELETE FROM price_alerts WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Toggle `is_active`; the triggered flag is left untouched
    pub async fn set_alert_active(&mut self, id: i64, active: bool) -> StoreResult<bool> {
        let conn = self.live().await?;
        let result = sqlx::query("UPDATE price_alerts SET is_active = ? WHERE id = ?")
            .bind(active as i64)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record an observed price and trigger the alert if it reached its target.
    ///
    /// Returns true only when this check moved the alert to triggered.
    pub async fn record_alert_check(&mut self, id: i64, price: i64) -> StoreResult<bool> {
        let conn = self.live().await?;
        let mut tx = conn.begin().await?;

        sqlx::query("UPDATE price_alerts SET last_checked = ?, last_price = ? WHERE id = ?")
            .bind(now_stamp())
            .bind(price)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let triggered = sqlx::query(
            r#"
            UPDATE price_alerts
            SET triggered = 1, is_active = 0
            WHERE id = ? AND triggered = 0 AND ? > 0 AND ? <= target_price
            "#,
        )
        .bind(id)
        .bind(price)
        .bind(price)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        tx.commit().await?;

        if triggered {
            info!(id, price, "Price alert triggered");
        }
        Ok(triggered)
    }

    /// Force an alert into the triggered state
    pub async fn mark_alert_triggered(&mut self, id: i64) -> StoreResult<bool> {
        let conn = self.live().await?;
        let result = sqlx::query("UPDATE price_alerts SET triggered = 1, is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
