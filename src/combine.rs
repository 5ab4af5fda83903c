//! Row accumulation, domestic round-trip combination and result ordering

use std::collections::HashSet;
use tracing::warn;

use crate::model::{FlightResult, RawFlightRow, SOURCE_DOMESTIC_OUTBOUND};

/// Collects rows across scroll passes, merging rows seen before
#[derive(Debug, Default)]
pub struct RowAccumulator {
    rows: Vec<RawFlightRow>,
    seen: HashSet<String>,
}

impl RowAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one pass worth of rows; returns how many were new
    pub fn extend(&mut self, rows: Vec<RawFlightRow>) -> usize {
        let mut added = 0;
        for row in rows {
            if self.seen.insert(row.identity_key()) {
                self.rows.push(row);
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<RawFlightRow> {
        self.rows
    }
}

/// Usable rows of one domestic leg, cheapest first, at most `cap`
pub fn cheapest_leg(rows: Vec<RawFlightRow>, cap: usize) -> Vec<RawFlightRow> {
    let mut usable: Vec<RawFlightRow> = rows.into_iter().filter(RawFlightRow::is_usable).collect();
    usable.sort_by_key(|row| row.price);
    usable.truncate(cap);
    usable
}

/// Every outbound row paired with every inbound row, in outbound-major order
pub fn combine_domestic(outbound: &[RawFlightRow], inbound: &[RawFlightRow]) -> Vec<FlightResult> {
    let mut combos = Vec::with_capacity(outbound.len() * inbound.len());
    for ob in outbound {
        for ib in inbound {
            combos.push(FlightResult::domestic_pair(ob, ib));
        }
    }
    combos
}

/// Single-leg results tagged with `source`
pub fn one_way_results(rows: &[RawFlightRow], source: &str) -> Vec<FlightResult> {
    rows.iter()
        .map(|row| FlightResult::one_way(row, source))
        .collect()
}

/// Outbound rows returned when the inbound phase could not complete
pub fn outbound_only(rows: &[RawFlightRow]) -> Vec<FlightResult> {
    one_way_results(rows, SOURCE_DOMESTIC_OUTBOUND)
}

/// Drop later results agreeing on (airline, price, departure_time, return_airline)
pub fn dedup(results: Vec<FlightResult>) -> Vec<FlightResult> {
    let mut seen = HashSet::with_capacity(results.len());
    results
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.airline.clone(),
                r.price,
                r.departure_time.clone(),
                r.return_airline.clone(),
            ))
        })
        .collect()
}

/// Stable ascending sort by price, then truncate. `max_results == 0` keeps all.
pub fn sort_and_truncate(mut results: Vec<FlightResult>, max_results: usize) -> Vec<FlightResult> {
    results.sort_by_key(|r| r.price);
    if max_results > 0 {
        results.truncate(max_results);
    }
    results
}

/// Drop inconsistent results, dedup, then order and cap
pub fn finalize(mut results: Vec<FlightResult>, max_results: usize) -> Vec<FlightResult> {
    let before = results.len();
    results.retain(FlightResult::is_consistent);
    if results.len() < before {
        warn!(dropped = before - results.len(), "Discarded inconsistent fares");
    }
    sort_and_truncate(dedup(results), max_results)
}
