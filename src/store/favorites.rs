use tracing::debug;

use super::StoreConnection;
use super::models::{Favorite, now_stamp};
use crate::error::{StoreError, StoreResult};
use crate::model::{FlightResult, RouteKey, SearchParams};

impl StoreConnection {
    /// Save `flight` from the search `params`; returns the new id
    pub async fn add_favorite(
        &mut self,
        flight: &FlightResult,
        params: &SearchParams,
        note: &str,
    ) -> StoreResult<i64> {
        let flight_json = serde_json::to_string(flight)?;
        let params_json = serde_json::to_string(params)?;
        let conn = self.live().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO favorites
                (airline, price, origin, destination, departure_date, return_date,
                 departure_time, arrival_time, stops, note, created_at,
                 flight_json, search_params)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&flight.airline)
        .bind(flight.price)
        .bind(&params.origin)
        .bind(&params.destination)
        .bind(&params.departure_date)
        .bind(&params.return_date)
        .bind(&flight.departure_time)
        .bind(&flight.arrival_time)
        .bind(flight.stops as i64)
        .bind(note)
        .bind(now_stamp())
        .bind(flight_json)
        .bind(params_json)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, airline = %flight.airline, price = flight.price, "Favorite added");
        Ok(id)
    }

    /// Every favorite, newest first
    pub async fn list_favorites(&mut self) -> StoreResult<Vec<Favorite>> {
        let conn = self.live().await?;
        let rows = sqlx::query("SELECT * FROM favorites ORDER BY created_at DESC, id DESC")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(Favorite::from_row).collect()
    }

    pub async fn get_favorite(&mut self, id: i64) -> StoreResult<Favorite> {
        let conn = self.live().await?;
        let row = sqlx::query("SELECT * FROM favorites WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("favorite {id}")))?;
        Favorite::from_row(&row)
    }

    /// Returns false when no favorite has `id`
    pub async fn update_favorite_note(&mut self, id: i64, note: &str) -> StoreResult<bool> {
        let conn = self.live().await?;
        let result = sqlx::query("UPDATE favorites SET note = ? WHERE id = ?")
            .bind(note)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_favorite(&mut self, id: i64) -> StoreResult<bool> {
        let conn = self.live().await?;
        let result = sqlx::query("DELETE FROM favorites WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether the same fare on the same route is already saved
    pub async fn is_favorite(&mut self, flight: &FlightResult, route: &RouteKey) -> StoreResult<bool> {
        let conn = self.live().await?;
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM favorites
            WHERE airline = ? AND price = ? AND departure_time = ?
              AND origin = ? AND destination = ?
            "#,
        )
        .bind(&flight.airline)
        .bind(flight.price)
        .bind(&flight.departure_time)
        .bind(&route.origin)
        .bind(&route.destination)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }
}
