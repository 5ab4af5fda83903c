//! Search parameters, extracted rows and priced itineraries

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::codes;
use crate::error::{ScraperError, ScraperResult};

/// Base of the Interpark air search path
pub const SEARCH_BASE_URL: &str = "https://travel.interpark.com/air/search/";

pub const DEFAULT_CURRENCY: &str = "KRW";
pub const SOURCE_DOMESTIC: &str = "Interpark (domestic)";
pub const SOURCE_DOMESTIC_OUTBOUND: &str = "Interpark (domestic outbound)";
pub const SOURCE_INTERNATIONAL: &str = "Interpark (Auto)";
pub const SOURCE_INTERNATIONAL_FALLBACK: &str = "Interpark (fallback)";
pub const SOURCE_MANUAL: &str = "Interpark (manual)";

pub const MAX_ADULTS: u32 = 9;
pub const DEFAULT_MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CabinClass {
    #[default]
    Economy,
    Business,
    First,
}

impl CabinClass {
    pub fn as_str(self) -> &'static str {
        match self {
            CabinClass::Economy => "ECONOMY",
            CabinClass::Business => "BUSINESS",
            CabinClass::First => "FIRST",
        }
    }

    /// Unknown labels fall back to economy, as the site does
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "BUSINESS" => CabinClass::Business,
            "FIRST" => CabinClass::First,
            _ => CabinClass::Economy,
        }
    }
}

impl std::fmt::Display for CabinClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (origin, destination, departure_date) correlating history, alerts and snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
}

impl RouteKey {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_date: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            departure_date: departure_date.into(),
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.origin, self.destination, self.departure_date)
    }
}

/// One requested search
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParams {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub cabin_class: CabinClass,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_adults() -> u32 {
    1
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl SearchParams {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_date: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
            departure_date: departure_date.into(),
            return_date: None,
            adults: default_adults(),
            cabin_class: CabinClass::default(),
            max_results: default_max_results(),
        }
    }

    pub fn with_return(mut self, return_date: impl Into<String>) -> Self {
        self.return_date = Some(return_date.into());
        self
    }

    pub fn with_adults(mut self, adults: u32) -> Self {
        self.adults = adults;
        self
    }

    pub fn with_cabin(mut self, cabin_class: CabinClass) -> Self {
        self.cabin_class = cabin_class;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Uppercase codes, `YYYYMMDD` dates, validated counts.
    ///
    /// Two searches are identical exactly when their normalized params are equal.
    pub fn normalize(&self) -> ScraperResult<SearchParams> {
        let origin = normalize_code(&self.origin, "origin")?;
        let destination = normalize_code(&self.destination, "destination")?;
        if origin == destination {
            return Err(ScraperError::InvalidSearch(format!(
                "origin and destination are both {origin}"
            )));
        }

        let departure = parse_date(&self.departure_date)?;
        let return_date = match self.return_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let ret = parse_date(raw)?;
                if ret < departure {
                    return Err(ScraperError::InvalidSearch(format!(
                        "return date {raw} is before departure date {}",
                        self.departure_date
                    )));
                }
                Some(ret.format("%Y%m%d").to_string())
            }
        };

        if self.adults == 0 || self.adults > MAX_ADULTS {
            return Err(ScraperError::InvalidSearch(format!(
                "adults must be between 1 and {MAX_ADULTS}, got {}",
                self.adults
            )));
        }

        Ok(SearchParams {
            origin,
            destination,
            departure_date: departure.format("%Y%m%d").to_string(),
            return_date,
            adults: self.adults,
            cabin_class: self.cabin_class,
            max_results: self.max_results,
        })
    }

    /// Cache key of already-normalized params
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.origin,
            self.destination,
            self.departure_date,
            self.return_date.as_deref().unwrap_or(""),
            self.adults,
            self.cabin_class,
            self.max_results
        )
    }

    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(&self.origin, &self.destination, &self.departure_date)
    }

    pub fn is_round_trip(&self) -> bool {
        self.return_date.is_some()
    }

    /// Both endpoints in the domestic set
    pub fn is_domestic(&self) -> bool {
        codes::is_domestic_code(&self.origin) && codes::is_domestic_code(&self.destination)
    }

    /// Search page URL: `c:` prefix for city codes, `a:` for plain airport codes
    pub fn search_url(&self) -> String {
        let (origin_prefix, origin_code) = site_code(&self.origin);
        let (dest_prefix, dest_code) = site_code(&self.destination);

        let mut path = format!(
            "{origin_prefix}:{origin_code}-{dest_prefix}:{dest_code}-{}",
            self.departure_date
        );
        if let Some(ret) = &self.return_date {
            path.push_str(&format!(
                "/{dest_prefix}:{dest_code}-{origin_prefix}:{origin_code}-{ret}"
            ));
        }

        format!(
            "{SEARCH_BASE_URL}{path}?cabin={}&adult={}",
            self.cabin_class, self.adults
        )
    }
}

fn site_code(code: &str) -> (&'static str, String) {
    match codes::city_code(code) {
        Some(city) => ("c", city.to_string()),
        None => ("a", code.to_ascii_uppercase()),
    }
}

fn normalize_code(code: &str, field: &str) -> ScraperResult<String> {
    if !codes::validate_airport_code(code) {
        return Err(ScraperError::InvalidSearch(format!(
            "{field} must be a three-letter code, got {code:?}"
        )));
    }
    Ok(code.trim().to_ascii_uppercase())
}

fn parse_date(raw: &str) -> ScraperResult<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| ScraperError::InvalidSearch(format!("unrecognized date {raw:?}")))
}

/// Shift a `YYYYMMDD` date by whole days
pub fn offset_date(date: &str, days: i64) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let shifted = parsed.checked_add_signed(chrono::Duration::days(days))?;
    Some(shifted.format("%Y%m%d").to_string())
}

/// One row as returned by a page script
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFlightRow {
    pub airline: String,
    pub price: i64,
    pub dep_time: String,
    pub arr_time: String,
    pub stops: u32,
    pub ret_dep_time: String,
    pub ret_arr_time: String,
    pub ret_stops: u32,
    pub is_round_trip: bool,
}

impl RawFlightRow {
    /// Positive price and both clock times present
    pub fn is_usable(&self) -> bool {
        self.price > 0 && !self.dep_time.is_empty() && !self.arr_time.is_empty()
    }

    /// Full identity, used to merge rows re-seen across scroll passes
    pub fn identity_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.airline,
            self.price,
            self.dep_time,
            self.arr_time,
            self.stops,
            self.ret_dep_time,
            self.ret_arr_time,
            self.ret_stops
        )
    }
}

/// One priced itinerary candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightResult {
    pub airline: String,
    pub flight_number: String,
    pub source: String,
    /// Total cost in the smallest currency unit
    pub price: i64,
    pub currency: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration: String,
    pub stops: u32,
    pub is_round_trip: bool,
    pub return_departure_time: String,
    pub return_arrival_time: String,
    pub return_duration: String,
    pub return_stops: u32,
    pub outbound_price: i64,
    pub return_price: i64,
    /// Set only when the inbound leg is flown by a different carrier
    pub return_airline: String,
}

impl Default for FlightResult {
    fn default() -> Self {
        Self {
            airline: String::new(),
            flight_number: String::new(),
            source: String::new(),
            price: 0,
            currency: DEFAULT_CURRENCY.to_string(),
            departure_time: String::new(),
            arrival_time: String::new(),
            duration: String::new(),
            stops: 0,
            is_round_trip: false,
            return_departure_time: String::new(),
            return_arrival_time: String::new(),
            return_duration: String::new(),
            return_stops: 0,
            outbound_price: 0,
            return_price: 0,
            return_airline: String::new(),
        }
    }
}

impl FlightResult {
    /// Single-leg fare
    pub fn one_way(row: &RawFlightRow, source: &str) -> Self {
        Self {
            airline: row.airline.clone(),
            source: source.to_string(),
            price: row.price,
            departure_time: row.dep_time.clone(),
            arrival_time: row.arr_time.clone(),
            stops: row.stops,
            ..Self::default()
        }
    }

    /// International row; the site prices round trips as one total
    pub fn itinerary(row: &RawFlightRow, source: &str) -> Self {
        let mut result = Self::one_way(row, source);
        if row.is_round_trip {
            result.is_round_trip = true;
            result.return_departure_time = row.ret_dep_time.clone();
            result.return_arrival_time = row.ret_arr_time.clone();
            result.return_stops = row.ret_stops;
        }
        result
    }

    /// Domestic outbound + inbound pair priced as the sum of both legs
    pub fn domestic_pair(outbound: &RawFlightRow, inbound: &RawFlightRow) -> Self {
        let return_airline = if outbound.airline != inbound.airline {
            inbound.airline.clone()
        } else {
            String::new()
        };
        Self {
            airline: outbound.airline.clone(),
            source: SOURCE_DOMESTIC.to_string(),
            price: outbound.price + inbound.price,
            departure_time: outbound.dep_time.clone(),
            arrival_time: outbound.arr_time.clone(),
            stops: outbound.stops,
            is_round_trip: true,
            return_departure_time: inbound.dep_time.clone(),
            return_arrival_time: inbound.arr_time.clone(),
            return_stops: inbound.stops,
            outbound_price: outbound.price,
            return_price: inbound.price,
            return_airline,
            ..Self::default()
        }
    }

    /// Round-trip fields agree with `is_round_trip` and the leg split adds up
    pub fn is_consistent(&self) -> bool {
        if !self.is_round_trip {
            return self.return_departure_time.is_empty()
                && self.return_arrival_time.is_empty()
                && self.return_duration.is_empty()
                && self.return_stops == 0
                && self.return_price == 0
                && self.outbound_price == 0
                && self.return_airline.is_empty();
        }
        let split = self.outbound_price != 0 || self.return_price != 0;
        !split || self.outbound_price + self.return_price == self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(airline: &str, price: i64, dep: &str, arr: &str) -> RawFlightRow {
        RawFlightRow {
            airline: airline.into(),
            price,
            dep_time: dep.into(),
            arr_time: arr.into(),
            ..RawFlightRow::default()
        }
    }

    #[test]
    fn normalize_uppercases_and_canonicalizes_dates() {
        let params = SearchParams::new(" icn", "nrt ", "2026-01-20")
            .with_return("20260125")
            .normalize()
            .unwrap();
        assert_eq!(params.origin, "ICN");
        assert_eq!(params.destination, "NRT");
        assert_eq!(params.departure_date, "20260120");
        assert_eq!(params.return_date.as_deref(), Some("20260125"));
    }

    #[test]
    fn normalized_variants_share_a_fingerprint() {
        let a = SearchParams::new("icn", "nrt", "2026-01-20").normalize().unwrap();
        let b = SearchParams::new("ICN", "NRT", "20260120").normalize().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn normalize_rejects_bad_input() {
        assert!(SearchParams::new("IC", "NRT", "20260120").normalize().is_err());
        assert!(SearchParams::new("ICN", "ICN", "20260120").normalize().is_err());
        assert!(SearchParams::new("ICN", "NRT", "2026/01/20").normalize().is_err());
        assert!(
            SearchParams::new("ICN", "NRT", "20260120")
                .with_return("20260119")
                .normalize()
                .is_err()
        );
        assert!(
            SearchParams::new("ICN", "NRT", "20260120")
                .with_adults(0)
                .normalize()
                .is_err()
        );
    }

    #[test]
    fn empty_return_date_means_one_way() {
        let params = SearchParams::new("ICN", "NRT", "20260120")
            .with_return("")
            .normalize()
            .unwrap();
        assert!(!params.is_round_trip());
    }

    #[test]
    fn round_trip_url_uses_city_prefixes() {
        let params = SearchParams::new("ICN", "NRT", "20260120")
            .with_return("20260125")
            .normalize()
            .unwrap();
        assert_eq!(
            params.search_url(),
            "https://travel.interpark.com/air/search/c:SEL-c:TYO-20260120/c:TYO-c:SEL-20260125?cabin=ECONOMY&adult=1"
        );
    }

    #[test]
    fn one_way_url_with_airport_prefix() {
        let params = SearchParams::new("ICN", "LAX", "20260301")
            .with_adults(2)
            .with_cabin(CabinClass::Business)
            .normalize()
            .unwrap();
        assert_eq!(
            params.search_url(),
            "https://travel.interpark.com/air/search/c:SEL-a:LAX-20260301?cabin=BUSINESS&adult=2"
        );
    }

    #[test]
    fn domestic_detection() {
        let gmp_cju = SearchParams::new("GMP", "CJU", "20260120").normalize().unwrap();
        let icn_nrt = SearchParams::new("ICN", "NRT", "20260120").normalize().unwrap();
        assert!(gmp_cju.is_domestic());
        assert!(!icn_nrt.is_domestic());
    }

    #[test]
    fn domestic_pair_splits_price_and_marks_cross_carrier() {
        let same = FlightResult::domestic_pair(
            &row("진에어", 50000, "07:00", "08:05"),
            &row("진에어", 40000, "19:00", "20:05"),
        );
        assert_eq!(same.price, 90000);
        assert_eq!(same.outbound_price + same.return_price, same.price);
        assert!(same.return_airline.is_empty());
        assert!(same.is_consistent());

        let cross = FlightResult::domestic_pair(
            &row("진에어", 50000, "07:00", "08:05"),
            &row("제주항공", 45000, "19:00", "20:05"),
        );
        assert_eq!(cross.return_airline, "제주항공");
    }

    #[test]
    fn one_way_itinerary_has_no_return_fields() {
        let mut raw = row("ANA", 320000, "09:00", "11:20");
        raw.ret_dep_time = "18:00".into();
        let result = FlightResult::itinerary(&raw, SOURCE_INTERNATIONAL);
        assert!(!result.is_round_trip);
        assert!(result.return_departure_time.is_empty());
        assert!(result.is_consistent());
    }

    #[test]
    fn raw_rows_deserialize_from_script_output() {
        let value = serde_json::json!([
            {"airline": "ANA", "price": 320000, "depTime": "09:00", "arrTime": "11:20",
             "stops": 0, "retDepTime": "18:00", "retArrTime": "20:30", "retStops": 0,
             "isRoundTrip": true},
            {"airline": "JAL", "price": 290000, "depTime": "10:00", "arrTime": "12:20"}
        ]);
        let rows: Vec<RawFlightRow> = serde_json::from_value(value).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_round_trip);
        assert_eq!(rows[1].ret_stops, 0);
    }

    #[test]
    fn offset_date_crosses_month_end() {
        assert_eq!(offset_date("20260130", 3).as_deref(), Some("20260202"));
        assert_eq!(offset_date("bogus", 3), None);
    }
}
