//! SQLite persistence for favorites, price history, search logs, price
//! alerts and per-route result snapshots
//!
//! `Store` is a cheap clonable handle holding the connect options. Every
//! worker opens its own [`StoreConnection`] from it; connections are never
//! shared between workers.

mod alerts;
mod favorites;
mod history;
mod maintenance;
pub mod models;
mod snapshot;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreResult;

pub use models::{
    AlertState, Favorite, LastSearch, NewPricePoint, PopularRoute, PriceAlert, PricePoint,
    PriceTrend, SearchLogEntry, StoreStats, Trend,
};

/// Timestamp layout of every `*_at` / `last_checked` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let store = Self { path, options };
        let mut conn = store.connect().await?;
        conn.migrate().await?;
        conn.close().await;

        info!(path = %store.path.display(), "Flight database ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh connection for one worker
    pub async fn connect(&self) -> StoreResult<StoreConnection> {
        let conn = SqliteConnection::connect_with(&self.options).await?;
        Ok(StoreConnection {
            options: self.options.clone(),
            conn: Some(conn),
        })
    }
}

/// One worker's connection
///
/// Probed with a ping before every operation; a dead connection is dropped
/// and replaced without surfacing an error to the caller.
pub struct StoreConnection {
    options: SqliteConnectOptions,
    conn: Option<SqliteConnection>,
}

impl StoreConnection {
    pub(crate) async fn live(&mut self) -> StoreResult<&mut SqliteConnection> {
        let healthy = match self.conn.as_mut() {
            Some(conn) => match conn.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Stale database connection, reconnecting: {}", e);
                    false
                }
            },
            None => false,
        };

        if !healthy {
            self.conn = None;
            debug!("Opening database connection");
            self.conn = Some(SqliteConnection::connect_with(&self.options).await?);
        }

        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(sqlx::Error::PoolClosed.into()),
        }
    }

    /// Close the underlying connection; the next operation reopens it
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(e) = conn.close().await
        {
            warn!("Failed to close database connection: {}", e);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn migrate(&mut self) -> StoreResult<()> {
        let conn = self.live().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS favorites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                airline TEXT NOT NULL,
                price INTEGER NOT NULL,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                departure_date TEXT NOT NULL,
                return_date TEXT,
                departure_time TEXT,
                arrival_time TEXT,
                stops INTEGER DEFAULT 0,
                note TEXT DEFAULT '',
                created_at TEXT NOT NULL,
                flight_json TEXT NOT NULL DEFAULT '{}',
                search_params TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                departure_date TEXT NOT NULL,
                airline TEXT,
                price INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                departure_date TEXT NOT NULL,
                return_date TEXT,
                adults INTEGER DEFAULT 1,
                result_count INTEGER DEFAULT 0,
                min_price INTEGER,
                searched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                departure_date TEXT NOT NULL,
                return_date TEXT,
                target_price INTEGER NOT NULL,
                is_active INTEGER DEFAULT 1,
                last_checked TEXT,
                last_price INTEGER,
                triggered INTEGER DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        // One row per route key, replaced wholesale by each new search
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS last_search (
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                departure_date TEXT NOT NULL,
                return_date TEXT,
                adults INTEGER DEFAULT 1,
                cabin_class TEXT DEFAULT 'ECONOMY',
                searched_at TEXT NOT NULL,
                result_count INTEGER DEFAULT 0,
                results_json TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (origin, destination, departure_date)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_ph_route ON price_history(origin, destination)",
            "CREATE INDEX IF NOT EXISTS idx_ph_date ON price_history(departure_date)",
            "CREATE INDEX IF NOT EXISTS idx_fav_route ON favorites(origin, destination)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_active ON price_alerts(is_active)",
            "CREATE INDEX IF NOT EXISTS idx_last_search_at ON last_search(searched_at)",
        ] {
            sqlx::query(index).execute(&mut *conn).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flights.db");
        let store = Store::open(&path).await.unwrap();
        assert!(path.exists());

        let mut conn = store.connect().await.unwrap();
        let live = conn.live().await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('favorites','price_history','search_logs','price_alerts','last_search')",
        )
        .fetch_one(&mut *live)
        .await
        .unwrap();
        assert_eq!(tables, 5);
        conn.close().await;
    }

    #[tokio::test]
    async fn closed_connection_reopens_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("flights.db")).await.unwrap();
        let mut conn = store.connect().await.unwrap();
        conn.close().await;
        assert!(!conn.is_connected());

        assert!(conn.get_stats().await.is_ok());
        assert!(conn.is_connected());
        conn.close().await;
    }

    #[tokio::test]
    async fn migrations_are_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flights.db");
        Store::open(&path).await.unwrap();
        assert!(Store::open(&path).await.is_ok());
    }
}
