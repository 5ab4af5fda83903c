use sqlx::Connection;
use tracing::info;

use super::StoreConnection;
use super::models::{LastSearch, now_stamp};
use crate::error::StoreResult;
use crate::model::{FlightResult, RouteKey, SearchParams};

impl StoreConnection {
    /// Replace the snapshot of the searched route with `results`.
    ///
    /// At most `limit` results are stored (0 stores all). Writers on
    /// different routes never touch each other's row.
    pub async fn save_last_search(
        &mut self,
        params: &SearchParams,
        results: &[FlightResult],
        limit: usize,
    ) -> StoreResult<usize> {
        let stored = if limit > 0 && results.len() > limit {
            &results[..limit]
        } else {
            results
        };
        let results_json = serde_json::to_string(stored)?;
        let route = params.route_key();

        let conn = self.live().await?;
        let mut tx = conn.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO last_search
                (origin, destination, departure_date, return_date, adults,
                 cabin_class, searched_at, result_count, results_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(origin, destination, departure_date) DO UPDATE SET
                return_date = excluded.return_date,
                adults = excluded.adults,
                cabin_class = excluded.cabin_class,
                searched_at = excluded.searched_at,
                result_count = excluded.result_count,
                results_json = excluded.results_json
            "#,
        )
        .bind(&route.origin)
        .bind(&route.destination)
        .bind(&route.departure_date)
        .bind(&params.return_date)
        .bind(params.adults as i64)
        .bind(params.cabin_class.as_str())
        .bind(now_stamp())
        .bind(results.len() as i64)
        .bind(results_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(route = %route, stored = stored.len(), total = results.len(), "Saved last search");
        Ok(stored.len())
    }

    pub async fn get_last_search(&mut self, route: &RouteKey) -> StoreResult<Option<LastSearch>> {
        let conn = self.live().await?;
        let row = sqlx::query(
            r#"
            SELECT * FROM last_search
            WHERE origin = ? AND destination = ? AND departure_date = ?
            "#,
        )
        .bind(&route.origin)
        .bind(&route.destination)
        .bind(&route.departure_date)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(LastSearch::from_row).transpose()
    }

    /// Most recently saved snapshot across all routes
    pub async fn latest_last_search(&mut self) -> StoreResult<Option<LastSearch>> {
        let conn = self.live().await?;
        let row = sqlx::query("SELECT * FROM last_search ORDER BY searched_at DESC, rowid DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(LastSearch::from_row).transpose()
    }

    pub async fn clear_last_search(&mut self) -> StoreResult<u64> {
        let conn = self.live().await?;
        let result = sqlx::query("DELETE FROM last_search").execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}
