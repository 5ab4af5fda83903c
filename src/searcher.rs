//! One logical search: cache lookup, browser drive, extraction, ordering

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::Launcher;
use crate::browser_setup::{LaunchOptions, SessionMode};
use crate::cache::SearchCache;
use crate::combine::{self, RowAccumulator};
use crate::error::{ScraperError, ScraperResult};
use crate::events::ProgressReporter;
use crate::model::{
    FlightResult, RawFlightRow, SOURCE_DOMESTIC, SOURCE_INTERNATIONAL,
    SOURCE_INTERNATIONAL_FALLBACK, SOURCE_MANUAL, SearchParams,
};
use crate::scripts::{self, ScriptArgs, ScriptId};
use crate::session::BrowserSession;
use crate::utils::{sleep_or_cancel, validate_interaction_timeout, validate_navigation_timeout};
use crate::{BrowserConfig, Config, ScraperConfig};

/// Terminal result of a search that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Completed(Vec<FlightResult>),
    Cancelled,
}

impl SearchOutcome {
    pub fn results(&self) -> Option<&[FlightResult]> {
        match self {
            SearchOutcome::Completed(results) => Some(results),
            SearchOutcome::Cancelled => None,
        }
    }

    pub fn into_results(self) -> Option<Vec<FlightResult>> {
        match self {
            SearchOutcome::Completed(results) => Some(results),
            SearchOutcome::Cancelled => None,
        }
    }
}

pub struct FlightSearcher {
    launcher: Arc<dyn Launcher>,
    cache: Arc<SearchCache>,
    cache_enabled: bool,
    scraper: ScraperConfig,
    browser: BrowserConfig,
    last_results: Mutex<Vec<FlightResult>>,
}

impl FlightSearcher {
    pub fn new(config: &Config, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            cache: Arc::new(SearchCache::from_config(&config.cache)),
            cache_enabled: config.cache.enabled,
            scraper: config.scraper.clone(),
            browser: config.browser.clone(),
            last_results: Mutex::new(Vec::new()),
        }
    }

    /// Share one cache between several searchers
    pub fn with_cache(mut self, cache: Arc<SearchCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    pub fn scraper_config(&self) -> &ScraperConfig {
        &self.scraper
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Results of the last completed search
    pub fn last_results(&self) -> Vec<FlightResult> {
        self.last_results.lock().clone()
    }

    pub fn cheapest(&self) -> Option<FlightResult> {
        self.last_results
            .lock()
            .iter()
            .min_by_key(|r| r.price)
            .cloned()
    }

    /// Search without progress reporting or external cancellation
    pub async fn search(
        &self,
        params: &SearchParams,
        force_refresh: bool,
    ) -> ScraperResult<SearchOutcome> {
        self.search_with(
            params,
            force_refresh,
            &CancellationToken::new(),
            &ProgressReporter::silent(),
        )
        .await
    }

    /// Run one search to completion, failure or cancellation.
    ///
    /// All or nothing: either the full ordered result list or an error. The
    /// browser session is closed on every path before this returns.
    pub async fn search_with(
        &self,
        params: &SearchParams,
        force_refresh: bool,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> ScraperResult<SearchOutcome> {
        let params = params.normalize()?;
        validate_navigation_timeout(self.scraper.page_load_timeout_ms)?;
        validate_interaction_timeout(self.scraper.data_wait_timeout_ms)?;

        let key = params.fingerprint();
        if self.cache_enabled
            && !force_refresh
            && let Some(results) = self.cache.get(&key)
        {
            progress.report(format!("Using cached results ({} fares)", results.len()));
            *self.last_results.lock() = results.clone();
            return Ok(SearchOutcome::Completed(results));
        }

        let started = Instant::now();
        let attempts = self.scraper.max_retry_count.max(1);
        let mut attempt = 0;
        let raw = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }

            match self.run_once(&params, cancel, progress).await {
                Ok(results) => break results,
                Err(ScraperError::Cancelled) => {
                    progress.report("Search cancelled");
                    return Ok(SearchOutcome::Cancelled);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, "Search attempt failed: {e}");
                    progress.report(format!(
                        "Network error, retrying ({attempt}/{attempts})"
                    ));
                    if !sleep_or_cancel(self.scraper.retry_delay(), cancel).await {
                        return Ok(SearchOutcome::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        if cancel.is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }

        let results = combine::finalize(raw, params.max_results);
        info!(
            route = %params.route_key(),
            count = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search finished"
        );
        progress.report(format!(
            "Search finished in {:.1}s with {} fares",
            started.elapsed().as_secs_f64(),
            results.len()
        ));

        if self.cache_enabled && !results.is_empty() {
            self.cache.put(key, results.clone());
        }
        *self.last_results.lock() = results.clone();
        Ok(SearchOutcome::Completed(results))
    }

    fn unattended_mode(&self) -> SessionMode {
        if self.browser.headless {
            SessionMode::Headless
        } else {
            SessionMode::Visible
        }
    }

    /// One attempt: open, drive, close
    async fn run_once(
        &self,
        params: &SearchParams,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> ScraperResult<Vec<FlightResult>> {
        let options = LaunchOptions::from_config(self.unattended_mode(), &self.browser);
        let mut session = BrowserSession::open(
            self.launcher.as_ref(),
            &options,
            self.scraper.engine_launch_timeout(),
            cancel.clone(),
        )
        .await?;
        progress.report(format!("Browser started ({})", session.engine()));

        let outcome = self.drive(&mut session, params, progress).await;
        session.close().await;
        outcome
    }

    async fn drive(
        &self,
        session: &mut BrowserSession,
        params: &SearchParams,
        progress: &ProgressReporter,
    ) -> ScraperResult<Vec<FlightResult>> {
        let url = params.search_url();
        let domestic = params.is_domestic();
        progress.report(if domestic {
            "Domestic search"
        } else {
            "International search"
        });
        progress.report(format!("Loading {url}"));
        session
            .navigate(&url, self.scraper.page_load_timeout())
            .await?;

        progress.report("Waiting for results");
        let ready_script = if domestic {
            ScriptId::DomesticResultsReady
        } else {
            ScriptId::InternationalResultsReady
        };
        let ready = session
            .wait_for_condition(ready_script, &ScriptArgs::None, self.scraper.data_wait_timeout())
            .await?;
        if !ready {
            progress.report("Results may not be fully loaded");
        }

        match (domestic, params.is_round_trip()) {
            (true, true) => self.domestic_round_trip(session, progress).await,
            (true, false) => self.domestic_one_way(session, progress).await,
            (false, _) => self.international(session, progress).await,
        }
    }

    async fn domestic_one_way(
        &self,
        session: &mut BrowserSession,
        progress: &ProgressReporter,
    ) -> ScraperResult<Vec<FlightResult>> {
        session.pause(self.scraper.page_stabilize()).await?;
        let rows = session
            .run_extraction(ScriptId::DomesticPrices, &ScriptArgs::domestic_carriers())
            .await?;
        let rows = combine::cheapest_leg(rows, self.scraper.domestic_leg_cap);
        if rows.is_empty() {
            return Err(ScraperError::DataExtraction(
                "no domestic fares found on the result page".into(),
            ));
        }
        progress.report(format!("Found {} domestic fares", rows.len()));
        Ok(combine::one_way_results(&rows, SOURCE_DOMESTIC))
    }

    async fn domestic_round_trip(
        &self,
        session: &mut BrowserSession,
        progress: &ProgressReporter,
    ) -> ScraperResult<Vec<FlightResult>> {
        progress.report("Collecting outbound flights");
        let outbound = self.collect_domestic_rows(session).await?;
        let outbound = combine::cheapest_leg(outbound, self.scraper.domestic_leg_cap);
        if outbound.is_empty() {
            return Err(ScraperError::DataExtraction(
                "no outbound flights found on the result page".into(),
            ));
        }
        progress.report(format!("Found {} outbound flights", outbound.len()));

        progress.report("Selecting outbound flight to open the return list");
        if !self.select_outbound(session, &outbound[0]).await? {
            progress.report("Could not select an outbound flight, returning outbound fares only");
            return Ok(combine::outbound_only(&outbound));
        }

        if !self.wait_for_return_view(session).await? {
            progress.report("Return list did not load, returning outbound fares only");
            return Ok(combine::outbound_only(&outbound));
        }

        session
            .pause(self.scraper.domestic_post_click_settle())
            .await?;
        progress.report("Collecting return flights");
        let inbound = match self.collect_domestic_rows(session).await {
            Ok(rows) => combine::cheapest_leg(rows, self.scraper.domestic_leg_cap),
            Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
            Err(e) => {
                warn!("Return flight extraction failed: {e}");
                Vec::new()
            }
        };
        if inbound.is_empty() {
            progress.report("No return flights found, returning outbound fares only");
            return Ok(combine::outbound_only(&outbound));
        }

        progress.report(format!(
            "Combining {} outbound x {} return flights",
            outbound.len(),
            inbound.len()
        ));
        Ok(combine::combine_domestic(&outbound, &inbound))
    }

    /// Click the cheapest outbound row, by its details first, then any carrier row
    async fn select_outbound(
        &self,
        session: &mut BrowserSession,
        best: &RawFlightRow,
    ) -> ScraperResult<bool> {
        let by_details = ScriptArgs::Flight {
            airline: best.airline.clone(),
            dep_time: best.dep_time.clone(),
            arr_time: best.arr_time.clone(),
            price_text: scripts::price_text(best.price),
        };
        for (id, args) in [
            (ScriptId::ClickFlightByDetails, by_details),
            (ScriptId::ClickFlight, ScriptArgs::domestic_carriers()),
        ] {
            match session.evaluate(id, &args).await {
                Ok(Value::Bool(true)) => return Ok(true),
                Ok(_) => debug!("{id} found nothing to click"),
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                Err(e) => warn!("{id} failed: {e}"),
            }
        }
        Ok(false)
    }

    /// Fixed interval x fixed attempts until the return list is on screen
    async fn wait_for_return_view(&self, session: &mut BrowserSession) -> ScraperResult<bool> {
        for _ in 0..self.scraper.domestic_return_max_polls.max(1) {
            match session
                .evaluate(ScriptId::DomesticReturnReady, &ScriptArgs::None)
                .await
            {
                Ok(Value::Bool(true)) => return Ok(true),
                Ok(_) => {}
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                Err(e) => debug!("Return view probe failed: {e}"),
            }
            session
                .pause(self.scraper.domestic_return_poll_interval())
                .await?;
        }
        Ok(false)
    }

    /// Scroll through a domestic list, collecting rows on every pass
    async fn collect_domestic_rows(
        &self,
        session: &mut BrowserSession,
    ) -> ScraperResult<Vec<RawFlightRow>> {
        let carriers = ScriptArgs::domestic_carriers();
        let mut acc = RowAccumulator::new();
        let (mut bottom_hits, mut no_scroll, mut no_new) = (0u32, 0u32, 0u32);
        let mut passes = 0;

        for _ in 0..self.scraper.domestic_max_scrolls {
            passes += 1;
            let rows = session
                .run_extraction(ScriptId::DomesticList, &carriers)
                .await?;
            let added = acc.extend(rows);

            let state = session.scroll_step().await?;
            session.pause(self.scraper.domestic_scroll_pause()).await?;

            if state.reached_bottom && added == 0 {
                bottom_hits += 1;
                if bottom_hits >= 3 {
                    break;
                }
                session.pause(self.scraper.domestic_bottom_pause()).await?;
                continue;
            }
            bottom_hits = 0;

            if state.can_scroll {
                no_scroll = 0;
            } else {
                no_scroll += 1;
                if no_scroll >= 3 {
                    break;
                }
            }

            if added == 0 {
                no_new += 1;
                if no_new >= 8 {
                    break;
                }
            } else {
                no_new = 0;
            }
        }

        debug!(rows = acc.len(), passes, "Domestic list collected");
        Ok(acc.into_rows())
    }

    async fn international(
        &self,
        session: &mut BrowserSession,
        progress: &ProgressReporter,
    ) -> ScraperResult<Vec<FlightResult>> {
        session.pause(self.scraper.page_stabilize()).await?;

        let mut acc = RowAccumulator::new();
        let mut previous_height = 0;
        for i in 0..self.scraper.international_max_scrolls {
            match self.international_pass(session, &mut acc).await {
                Ok(height) => {
                    if height == previous_height && i > 2 {
                        break;
                    }
                    previous_height = height;
                }
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                Err(e) => {
                    warn!("Primary extraction stopped: {e}");
                    break;
                }
            }
        }

        let primary: Vec<RawFlightRow> = acc
            .into_rows()
            .into_iter()
            .filter(RawFlightRow::is_usable)
            .collect();
        let (rows, source) = if primary.is_empty() {
            progress.report("Primary extraction found no fares, trying fallback");
            let rows = session
                .run_extraction(ScriptId::InternationalFallback, &ScriptArgs::None)
                .await?;
            (rows, SOURCE_INTERNATIONAL_FALLBACK)
        } else {
            (primary, SOURCE_INTERNATIONAL)
        };

        let results: Vec<FlightResult> = rows
            .iter()
            .filter(|row| row.is_usable())
            .map(|row| FlightResult::itinerary(row, source))
            .collect();
        if results.is_empty() {
            return Err(ScraperError::DataExtraction(
                "neither primary nor fallback extraction found fares".into(),
            ));
        }
        progress.report(format!("Found {} fares", results.len()));
        Ok(results)
    }

    /// Extract, scroll to the bottom, pause; returns the new page height
    async fn international_pass(
        &self,
        session: &mut BrowserSession,
        acc: &mut RowAccumulator,
    ) -> ScraperResult<i64> {
        let rows = session
            .run_extraction(ScriptId::InternationalPrices, &ScriptArgs::None)
            .await?;
        let added = acc.extend(rows);
        debug!(added, total = acc.len(), "International pass");

        session
            .evaluate(ScriptId::ScrollToBottom, &ScriptArgs::None)
            .await?;
        session.pause(self.scraper.scroll_pause()).await?;
        session.page_height().await
    }

    /// Open a visible browser on the persistent profile for the user to drive.
    ///
    /// Navigation to the search page is best-effort; the caller owns the
    /// returned session and must close it.
    pub async fn start_manual_session(&self, params: &SearchParams) -> ScraperResult<ManualSession> {
        let params = params.normalize()?;
        let profile_dir = self.browser.resolved_profile_dir();
        let options = LaunchOptions::from_config(
            SessionMode::PersistentProfile(profile_dir),
            &self.browser,
        );

        let mut session = BrowserSession::open(
            self.launcher.as_ref(),
            &options,
            self.scraper.engine_launch_timeout(),
            CancellationToken::new(),
        )
        .await
        .map_err(|e| ScraperError::ManualModeActivation(e.to_string()))?;

        let url = params.search_url();
        if let Err(e) = session
            .navigate(&url, self.scraper.page_load_timeout())
            .await
        {
            warn!("Manual session could not load the search page: {e}");
        }
        info!(url = %url, "Manual session opened");

        Ok(ManualSession {
            session,
            is_domestic: params.is_domestic(),
            scraper: self.scraper.clone(),
        })
    }
}

/// Visible browser handed to the caller after automatic extraction failed
pub struct ManualSession {
    session: BrowserSession,
    is_domestic: bool,
    scraper: ScraperConfig,
}

impl ManualSession {
    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn is_domestic(&self) -> bool {
        self.is_domestic
    }

    /// Read fares from whatever page the user has reached, cheapest first
    pub async fn extract(&mut self) -> ScraperResult<Vec<FlightResult>> {
        let rows = if self.is_domestic {
            self.session
                .run_extraction(ScriptId::DomesticPrices, &ScriptArgs::domestic_carriers())
                .await?
        } else {
            self.session
                .scroll_to_load_more(self.scraper.international_max_scrolls, self.scraper.scroll_pause())
                .await?;
            let rows = self
                .session
                .run_extraction(ScriptId::InternationalPrices, &ScriptArgs::None)
                .await?;
            if rows.is_empty() {
                self.session
                    .run_extraction(ScriptId::InternationalFallback, &ScriptArgs::None)
                    .await?
            } else {
                rows
            }
        };

        let results = rows
            .iter()
            .filter(|row| row.is_usable())
            .map(|row| FlightResult::itinerary(row, SOURCE_MANUAL))
            .collect();
        Ok(combine::finalize(results, 0))
    }

    pub async fn close(mut self) {
        self.session.close().await;
    }
}
