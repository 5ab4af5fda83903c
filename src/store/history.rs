use chrono::{Duration as ChronoDuration, Local};
use sqlx::{Connection, Row};

use super::StoreConnection;
use super::models::{
    NewPricePoint, PopularRoute, PricePoint, PriceTrend, SearchLogEntry, now_stamp,
};
use crate::error::StoreResult;

const INSERT_PRICE_POINT: &str = r#"
    INSERT INTO price_history
        (origin, destination, departure_date, airline, price, recorded_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

/// Days of history summarized by `get_price_trend`
const TREND_WINDOW_DAYS: i64 = 30;

impl StoreConnection {
    pub async fn add_price_history(&mut self, point: &NewPricePoint) -> StoreResult<()> {
        let conn = self.live().await?;
        sqlx::query(INSERT_PRICE_POINT)
            .bind(&point.route.origin)
            .bind(&point.route.destination)
            .bind(&point.route.departure_date)
            .bind(&point.airline)
            .bind(point.price)
            .bind(now_stamp())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Append all `points` in one transaction
    pub async fn add_price_history_batch(&mut self, points: &[NewPricePoint]) -> StoreResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let recorded_at = now_stamp();
        let conn = self.live().await?;
        let mut tx = conn.begin().await?;
        for point in points {
            sqlx::query(INSERT_PRICE_POINT)
                .bind(&point.route.origin)
                .bind(&point.route.destination)
                .bind(&point.route.departure_date)
                .bind(&point.airline)
                .bind(point.price)
                .bind(&recorded_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(points.len())
    }

    /// Points on a route recorded within the last `days`, oldest first
    pub async fn get_price_history(
        &mut self,
        origin: &str,
        destination: &str,
        days: i64,
    ) -> StoreResult<Vec<PricePoint>> {
        let cutoff = (Local::now() - ChronoDuration::days(days))
            .format("%Y-%m-%d")
            .to_string();
        let conn = self.live().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM price_history
            WHERE origin = ? AND destination = ? AND recorded_at >= ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(origin)
        .bind(destination)
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(PricePoint::from_row).collect())
    }

    pub async fn get_price_trend(&mut self, origin: &str, destination: &str) -> StoreResult<PriceTrend> {
        let points = self
            .get_price_history(origin, destination, TREND_WINDOW_DAYS)
            .await?;
        Ok(PriceTrend::from_points(&points))
    }

    pub async fn log_search(&mut self, entry: &SearchLogEntry) -> StoreResult<()> {
        let conn = self.live().await?;
        sqlx::query(
            r#"
            INSERT INTO search_logs
                (origin, destination, departure_date, return_date, adults,
                 result_count, min_price, searched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.route.origin)
        .bind(&entry.route.destination)
        .bind(&entry.route.departure_date)
        .bind(&entry.return_date)
        .bind(entry.adults as i64)
        .bind(entry.result_count as i64)
        .bind(entry.min_price)
        .bind(now_stamp())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Most searched routes, most frequent first
    pub async fn get_popular_routes(&mut self, limit: i64) -> StoreResult<Vec<PopularRoute>> {
        let conn = self.live().await?;
        let rows = sqlx::query(
            r#"
            SELECT origin, destination, COUNT(*) AS count, AVG(min_price) AS avg_price
            FROM search_logs
            GROUP BY origin, destination
            ORDER BY count DESC, origin ASC, destination ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PopularRoute {
                origin: row.get("origin"),
                destination: row.get("destination"),
                count: row.get("count"),
                avg_price: row.get("avg_price"),
            })
            .collect())
    }
}
