//! Post-search bookkeeping and price-alert checks
//!
//! Everything written here is secondary to the search itself: a failed write
//! is logged at `warn` and the search result stands.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::DatabaseConfig;
use crate::error::{ErrorKind, StoreResult};
use crate::events::ProgressReporter;
use crate::model::{FlightResult, RouteKey, SearchParams};
use crate::searcher::{FlightSearcher, SearchOutcome};
use crate::store::{NewPricePoint, PriceAlert, SearchLogEntry, Store, StoreConnection};

/// What `record_search` managed to write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordReport {
    pub history_points: usize,
    pub logged: bool,
    pub snapshot_rows: usize,
    pub triggered_alerts: Vec<i64>,
}

/// Owns a store handle and records finished searches on a fresh connection
#[derive(Debug, Clone)]
pub struct SearchRecorder {
    store: Store,
    snapshot_limit: usize,
}

impl SearchRecorder {
    pub fn new(store: Store, config: &DatabaseConfig) -> Self {
        Self {
            store,
            snapshot_limit: config.snapshot_limit,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn record(&self, params: &SearchParams, results: &[FlightResult]) -> RecordReport {
        let mut conn = match self.store.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Could not open database to record search: {}", e);
                return RecordReport::default();
            }
        };
        let report = record_search(&mut conn, params, results, self.snapshot_limit).await;
        conn.close().await;
        report
    }
}

/// Cheapest fare of every carrier in `results`, cheapest first
pub fn cheapest_per_carrier(route: &RouteKey, results: &[FlightResult]) -> Vec<NewPricePoint> {
    let mut best: HashMap<&str, i64> = HashMap::new();
    for result in results.iter().filter(|r| r.price > 0) {
        best.entry(result.airline.as_str())
            .and_modify(|price| *price = (*price).min(result.price))
            .or_insert(result.price);
    }

    let mut points: Vec<NewPricePoint> = best
        .into_iter()
        .map(|(airline, price)| {
            let airline = (!airline.is_empty()).then(|| airline.to_string());
            NewPricePoint::new(route.clone(), airline, price)
        })
        .collect();
    points.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.airline.cmp(&b.airline)));
    points
}

/// Write price history, a search log entry and the route snapshot for one
/// finished search, then update alerts watching the route.
///
/// `params` should be normalized. Never fails; each write that fails is
/// logged and skipped.
pub async fn record_search(
    conn: &mut StoreConnection,
    params: &SearchParams,
    results: &[FlightResult],
    snapshot_limit: usize,
) -> RecordReport {
    let mut report = RecordReport::default();
    if results.is_empty() {
        return report;
    }
    let route = params.route_key();

    match conn
        .add_price_history_batch(&cheapest_per_carrier(&route, results))
        .await
    {
        Ok(n) => report.history_points = n,
        Err(e) => warn!(route = %route, "Failed to record price history: {}", e),
    }

    match conn
        .log_search(&SearchLogEntry::from_search(params, results))
        .await
    {
        Ok(()) => report.logged = true,
        Err(e) => warn!(route = %route, "Failed to log search: {}", e),
    }

    match conn.save_last_search(params, results, snapshot_limit).await {
        Ok(n) => report.snapshot_rows = n,
        Err(e) => warn!(route = %route, "Failed to save last search: {}", e),
    }

    if let Some(min_price) = results.iter().map(|r| r.price).filter(|p| *p > 0).min() {
        match update_matching_alerts(conn, params, min_price).await {
            Ok(ids) => report.triggered_alerts = ids,
            Err(e) => warn!(route = %route, "Failed to update price alerts: {}", e),
        }
    }

    report
}

/// Record `min_price` against every active alert watching the searched
/// route; returns the ids of alerts that triggered
async fn update_matching_alerts(
    conn: &mut StoreConnection,
    params: &SearchParams,
    min_price: i64,
) -> StoreResult<Vec<i64>> {
    let alerts = conn.get_active_alerts().await?;
    let mut triggered = Vec::new();
    for alert in alerts.iter().filter(|a| a.matches(params)) {
        if conn.record_alert_check(alert.id, min_price).await? {
            info!(
                id = alert.id,
                route = %alert.route_key(),
                min_price,
                target = alert.target_price,
                "Price alert reached its target"
            );
            triggered.push(alert.id);
        }
    }
    Ok(triggered)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertCheckOutcome {
    Triggered { price: i64 },
    Watching { price: i64 },
    NoFares,
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCheck {
    pub alert: PriceAlert,
    pub outcome: AlertCheckOutcome,
}

/// Search every active alert's route once and record what was found.
///
/// Stops early, returning the checks done so far, when `cancel` fires.
/// Only a failure to read the alert list is returned as an error.
pub async fn check_alerts(
    conn: &mut StoreConnection,
    searcher: &FlightSearcher,
    cancel: &CancellationToken,
    progress: &ProgressReporter,
) -> StoreResult<Vec<AlertCheck>> {
    let alerts = conn.get_active_alerts().await?;
    let mut checks = Vec::with_capacity(alerts.len());

    for alert in alerts {
        if cancel.is_cancelled() {
            break;
        }
        progress.report(format!(
            "Checking alert #{} {} (target {})",
            alert.id,
            alert.route_key(),
            alert.target_price
        ));

        let outcome = match searcher
            .search_with(&alert.search_params(), false, cancel, progress)
            .await
        {
            Ok(SearchOutcome::Cancelled) => break,
            Ok(SearchOutcome::Completed(results)) => {
                match results.iter().map(|r| r.price).filter(|p| *p > 0).min() {
                    None => AlertCheckOutcome::NoFares,
                    Some(price) => match conn.record_alert_check(alert.id, price).await {
                        Ok(true) => AlertCheckOutcome::Triggered { price },
                        Ok(false) => AlertCheckOutcome::Watching { price },
                        Err(e) => {
                            warn!(id = alert.id, "Failed to record alert check: {}", e);
                            AlertCheckOutcome::Watching { price }
                        }
                    },
                }
            }
            Err(e) => {
                warn!(id = alert.id, "Alert search failed: {}", e);
                AlertCheckOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        checks.push(AlertCheck { alert, outcome });
    }

    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fare(airline: &str, price: i64) -> FlightResult {
        FlightResult {
            airline: airline.into(),
            price,
            ..FlightResult::default()
        }
    }

    #[test]
    fn one_point_per_carrier_at_its_cheapest() {
        let route = RouteKey::new("ICN", "NRT", "20260120");
        let points = cheapest_per_carrier(
            &route,
            &[
                fare("JAL", 320_000),
                fare("ANA", 300_000),
                fare("JAL", 290_000),
                fare("ANA", 0),
                fare("", 410_000),
            ],
        );
        let summary: Vec<(Option<&str>, i64)> = points
            .iter()
            .map(|p| (p.airline.as_deref(), p.price))
            .collect();
        assert_eq!(
            summary,
            vec![(Some("JAL"), 290_000), (Some("ANA"), 300_000), (None, 410_000)]
        );
    }

    #[tokio::test]
    async fn recording_updates_matching_alerts_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("flights.db")).await.unwrap();
        let mut conn = store.connect().await.unwrap();

        let route = RouteKey::new("ICN", "NRT", "20260301");
        let hit = conn
            .add_price_alert(&route, Some("20260305"), 300_000)
            .await
            .unwrap();
        let other_return = conn
            .add_price_alert(&route, Some("20260306"), 300_000)
            .await
            .unwrap();
        let any_return = conn.add_price_alert(&route, None, 300_000).await.unwrap();

        let params = SearchParams::new("ICN", "NRT", "20260301").with_return("20260305");
        let report = record_search(&mut conn, &params, &[fare("Test", 250_000)], 1000).await;

        assert_eq!(report.history_points, 1);
        assert!(report.logged);
        assert_eq!(report.snapshot_rows, 1);
        let mut triggered = report.triggered_alerts.clone();
        triggered.sort();
        assert_eq!(triggered, vec![hit, any_return]);

        let untouched = conn
            .get_all_alerts()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.id == other_return)
            .unwrap();
        assert!(untouched.last_checked.is_none());
        conn.close().await;
    }

    #[tokio::test]
    async fn empty_results_record_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("flights.db")).await.unwrap();
        let mut conn = store.connect().await.unwrap();
        let params = SearchParams::new("ICN", "NRT", "20260301");
        assert_eq!(
            record_search(&mut conn, &params, &[], 1000).await,
            RecordReport::default()
        );
        assert_eq!(conn.get_stats().await.unwrap().search_logs, 0);
        conn.close().await;
    }
}
