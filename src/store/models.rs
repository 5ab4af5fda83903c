//! Records read from and written to the flight database

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::TIMESTAMP_FORMAT;
use crate::error::StoreResult;
use crate::model::{CabinClass, FlightResult, RouteKey, SearchParams};

pub(crate) fn now_stamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Hours elapsed since a stored timestamp; 0.0 when it cannot be parsed
pub(crate) fn hours_since(stamp: &str) -> f64 {
    match NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) {
        Ok(at) => {
            let elapsed = Local::now().naive_local() - at;
            elapsed.num_seconds() as f64 / 3600.0
        }
        Err(_) => 0.0,
    }
}

/// A saved fare with the search that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: i64,
    pub airline: String,
    pub price: i64,
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    pub return_date: Option<String>,
    pub departure_time: String,
    pub arrival_time: String,
    pub stops: u32,
    pub note: String,
    pub created_at: String,
    pub flight: FlightResult,
    pub search_params: SearchParams,
}

impl Favorite {
    pub(crate) fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        let flight_json: String = row.get("flight_json");
        let params_json: String = row.get("search_params");
        Ok(Self {
            id: row.get("id"),
            airline: row.get("airline"),
            price: row.get("price"),
            origin: row.get("origin"),
            destination: row.get("destination"),
            departure_date: row.get("departure_date"),
            return_date: row.get("return_date"),
            departure_time: row
                .get::<Option<String>, _>("departure_time")
                .unwrap_or_default(),
            arrival_time: row
                .get::<Option<String>, _>("arrival_time")
                .unwrap_or_default(),
            stops: row.get::<i64, _>("stops") as u32,
            note: row.get::<Option<String>, _>("note").unwrap_or_default(),
            created_at: row.get("created_at"),
            flight: serde_json::from_str(&flight_json)?,
            search_params: serde_json::from_str(&params_json)?,
        })
    }
}

/// One price observation to append to the history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPricePoint {
    pub route: RouteKey,
    pub airline: Option<String>,
    pub price: i64,
}

impl NewPricePoint {
    pub fn new(route: RouteKey, airline: Option<String>, price: i64) -> Self {
        Self {
            route,
            airline,
            price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub id: i64,
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    pub airline: Option<String>,
    pub price: i64,
    pub recorded_at: String,
}

impl PricePoint {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            origin: row.get("origin"),
            destination: row.get("destination"),
            departure_date: row.get("departure_date"),
            airline: row.get("airline"),
            price: row.get("price"),
            recorded_at: row.get("recorded_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
    Unknown,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
            Trend::Unknown => "unknown",
        }
    }
}

/// Summary of a route's recent price history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrend {
    pub trend: Trend,
    /// Latest price minus the one before it
    pub change: i64,
    pub min: i64,
    pub max: i64,
    pub avg: i64,
    pub current: i64,
    pub points: Vec<(String, i64)>,
}

impl PriceTrend {
    pub fn from_points(points: &[PricePoint]) -> Self {
        let prices: Vec<i64> = points.iter().map(|p| p.price).collect();
        let Some(&current) = prices.last() else {
            return Self {
                trend: Trend::Unknown,
                change: 0,
                min: 0,
                max: 0,
                avg: 0,
                current: 0,
                points: Vec::new(),
            };
        };

        let (trend, change) = match prices.len() {
            1 => (Trend::Stable, 0),
            n => {
                let change = current - prices[n - 2];
                let trend = match change {
                    c if c > 0 => Trend::Up,
                    c if c < 0 => Trend::Down,
                    _ => Trend::Stable,
                };
                (trend, change)
            }
        };

        Self {
            trend,
            change,
            min: prices.iter().copied().min().unwrap_or(current),
            max: prices.iter().copied().max().unwrap_or(current),
            avg: prices.iter().sum::<i64>() / prices.len() as i64,
            current,
            points: points
                .iter()
                .map(|p| (p.recorded_at.clone(), p.price))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLogEntry {
    pub route: RouteKey,
    pub return_date: Option<String>,
    pub adults: u32,
    pub result_count: usize,
    pub min_price: Option<i64>,
}

impl SearchLogEntry {
    pub fn from_search(params: &SearchParams, results: &[FlightResult]) -> Self {
        Self {
            route: params.route_key(),
            return_date: params.return_date.clone(),
            adults: params.adults,
            result_count: results.len(),
            min_price: results.iter().map(|r| r.price).min(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularRoute {
    pub origin: String,
    pub destination: String,
    pub count: i64,
    pub avg_price: Option<f64>,
}

/// Derived lifecycle position of a price alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Inactive,
    ActiveUnwatched,
    WatchedNotTriggered,
    Triggered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: i64,
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    pub return_date: Option<String>,
    pub target_price: i64,
    pub is_active: bool,
    pub last_checked: Option<String>,
    pub last_price: Option<i64>,
    pub triggered: bool,
    pub created_at: String,
}

impl PriceAlert {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            origin: row.get("origin"),
            destination: row.get("destination"),
            departure_date: row.get("departure_date"),
            return_date: row.get("return_date"),
            target_price: row.get("target_price"),
            is_active: row.get::<i64, _>("is_active") != 0,
            last_checked: row.get("last_checked"),
            last_price: row.get("last_price"),
            triggered: row.get::<i64, _>("triggered") != 0,
            created_at: row.get("created_at"),
        }
    }

    pub fn state(&self) -> AlertState {
        if self.triggered {
            AlertState::Triggered
        } else if !self.is_active {
            AlertState::Inactive
        } else if self.last_checked.is_none() {
            AlertState::ActiveUnwatched
        } else {
            AlertState::WatchedNotTriggered
        }
    }

    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(&self.origin, &self.destination, &self.departure_date)
    }

    /// The search that checks this alert
    pub fn search_params(&self) -> SearchParams {
        let params = SearchParams::new(&self.origin, &self.destination, &self.departure_date);
        match &self.return_date {
            Some(ret) => params.with_return(ret),
            None => params,
        }
    }

    pub fn is_met_by(&self, price: i64) -> bool {
        price > 0 && price <= self.target_price
    }

    /// Whether a search for `params` observes this alert's route.
    ///
    /// An alert without a return date matches one-way and round-trip
    /// searches alike.
    pub fn matches(&self, params: &SearchParams) -> bool {
        self.origin.eq_ignore_ascii_case(&params.origin)
            && self.destination.eq_ignore_ascii_case(&params.destination)
            && self.departure_date == params.departure_date
            && match &self.return_date {
                Some(ret) => params.return_date.as_deref() == Some(ret.as_str()),
                None => true,
            }
    }
}

/// Stored snapshot of the latest search on one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSearch {
    pub route: RouteKey,
    pub return_date: Option<String>,
    pub adults: u32,
    pub cabin_class: CabinClass,
    pub searched_at: String,
    /// Result count of the search, before the snapshot limit applied
    pub result_count: usize,
    /// Stored results, cheapest first
    pub results: Vec<FlightResult>,
    pub hours_ago: f64,
}

impl LastSearch {
    pub(crate) fn from_row(row: &SqliteRow) -> StoreResult<Self> {
        let results_json: String = row.get("results_json");
        let mut results: Vec<FlightResult> = serde_json::from_str(&results_json)?;
        results.sort_by_key(|r| r.price);

        let searched_at: String = row.get("searched_at");
        let cabin: Option<String> = row.get("cabin_class");
        Ok(Self {
            route: RouteKey::new(
                row.get::<String, _>("origin"),
                row.get::<String, _>("destination"),
                row.get::<String, _>("departure_date"),
            ),
            return_date: row.get("return_date"),
            adults: row.get::<i64, _>("adults") as u32,
            cabin_class: CabinClass::parse_lenient(cabin.as_deref().unwrap_or_default()),
            hours_ago: hours_since(&searched_at),
            searched_at,
            result_count: row.get::<i64, _>("result_count") as usize,
            results,
        })
    }

    /// Parameters that reproduce the stored search
    pub fn search_params(&self) -> SearchParams {
        let params = SearchParams::new(
            &self.route.origin,
            &self.route.destination,
            &self.route.departure_date,
        )
        .with_adults(self.adults)
        .with_cabin(self.cabin_class);
        match &self.return_date {
            Some(ret) => params.with_return(ret),
            None => params,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub favorites: i64,
    pub price_history: i64,
    pub search_logs: i64,
    pub price_alerts: i64,
    pub snapshots: i64,
}
