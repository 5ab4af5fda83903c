//! Multi-destination and date-range sweeps over a bounded worker pool
//!
//! Each job runs one `FlightSearcher` search with its own browser session and,
//! when recording is enabled, its own database connection. Results are keyed
//! by destination or date; completion order carries no meaning.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::ParallelConfig;
use crate::error::{ScraperError, ScraperResult};
use crate::events::ProgressReporter;
use crate::model::{FlightResult, SearchParams, offset_date};
use crate::monitor::SearchRecorder;
use crate::searcher::{FlightSearcher, SearchOutcome};

/// Upper bound on simultaneous browser sessions
pub const MAX_CONCURRENT_LIMIT: usize = 4;

/// Cheapest fare found for one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatePrice {
    pub min_price: i64,
    pub airline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateOutcome {
    Found(DatePrice),
    Empty,
    /// Fares could not be read automatically; a manual session is needed
    ManualRequired,
    Failed(String),
    Cancelled,
}

impl DateOutcome {
    fn from_search(outcome: ScraperResult<SearchOutcome>) -> Self {
        match outcome {
            Ok(SearchOutcome::Cancelled) => DateOutcome::Cancelled,
            Ok(SearchOutcome::Completed(results)) => match cheapest(&results) {
                Some(best) => DateOutcome::Found(DatePrice {
                    min_price: best.price,
                    airline: best.airline.clone(),
                }),
                None => DateOutcome::Empty,
            },
            Err(ScraperError::DataExtraction(_)) => DateOutcome::ManualRequired,
            Err(e) => DateOutcome::Failed(e.to_string()),
        }
    }

    pub fn price(&self) -> Option<i64> {
        match self {
            DateOutcome::Found(found) => Some(found.min_price),
            _ => None,
        }
    }
}

fn cheapest(results: &[FlightResult]) -> Option<&FlightResult> {
    results.iter().filter(|r| r.price > 0).min_by_key(|r| r.price)
}

pub struct ParallelSearcher {
    searcher: Arc<FlightSearcher>,
    max_concurrent: usize,
    max_date_range: usize,
    recorder: Option<SearchRecorder>,
}

impl ParallelSearcher {
    pub fn new(searcher: Arc<FlightSearcher>, config: &ParallelConfig) -> Self {
        Self {
            searcher,
            max_concurrent: config.max_concurrent.clamp(1, MAX_CONCURRENT_LIMIT),
            max_date_range: config.max_date_range.max(1),
            recorder: None,
        }
    }

    /// Record every successful search through `recorder`
    pub fn with_recorder(mut self, recorder: SearchRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Search `base` once per destination.
    ///
    /// Each destination maps to its results, its error, or
    /// `SearchOutcome::Cancelled` when `cancel` fired first.
    pub async fn search_destinations(
        &self,
        base: &SearchParams,
        destinations: &[String],
        cancel: &CancellationToken,
        progress: &Arc<ProgressReporter>,
    ) -> BTreeMap<String, ScraperResult<SearchOutcome>> {
        progress.report(format!(
            "Parallel search started: {} destinations ({} at a time)",
            destinations.len(),
            self.max_concurrent
        ));

        let jobs = destinations
            .iter()
            .map(|dest| {
                let mut params = base.clone();
                params.destination = dest.clone();
                (dest.clone(), params)
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        for (dest, outcome) in self.fan_out(jobs, cancel, progress.clone()).await {
            if let Ok(SearchOutcome::Completed(results)) = &outcome {
                let best = cheapest(results).map(|r| r.price).unwrap_or(0);
                progress.report(format!("{dest} done: {} fares, cheapest {best}", results.len()));
            }
            outcomes.insert(dest, outcome);
        }

        progress.report(format!("Parallel search finished: {} destinations", outcomes.len()));
        outcomes
    }

    /// Search `base` once per departure date and keep the cheapest fare of each.
    ///
    /// With `return_offset_days > 0` every search is a round trip returning
    /// that many days after departure. Only the first `max_date_range` dates
    /// are searched.
    pub async fn search_date_range(
        &self,
        base: &SearchParams,
        dates: &[String],
        return_offset_days: i64,
        cancel: &CancellationToken,
        progress: &Arc<ProgressReporter>,
    ) -> BTreeMap<String, DateOutcome> {
        let mut dates = dates.to_vec();
        if dates.len() > self.max_date_range {
            progress.report(format!("Only the first {} dates are searched", self.max_date_range));
            dates.truncate(self.max_date_range);
        }
        let total = dates.len();
        progress.report(format!(
            "Date search started: {total} dates ({} at a time)",
            self.max_concurrent
        ));

        let jobs = dates
            .into_iter()
            .map(|date| {
                let mut params = base.clone();
                params.return_date = if return_offset_days > 0 {
                    offset_date(&date, return_offset_days)
                } else {
                    None
                };
                params.departure_date = date.clone();
                (date, params)
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        let silent = Arc::new(ProgressReporter::silent());
        for (done, (date, outcome)) in self
            .fan_out(jobs, cancel, silent)
            .await
            .into_iter()
            .enumerate()
        {
            let outcome = DateOutcome::from_search(outcome);
            let status = match &outcome {
                DateOutcome::Found(found) => format!("{} ({})", found.min_price, found.airline),
                DateOutcome::Empty => "no fares".to_string(),
                DateOutcome::ManualRequired => "needs manual search, skipped".to_string(),
                DateOutcome::Failed(msg) => format!("failed: {msg}"),
                DateOutcome::Cancelled => "cancelled".to_string(),
            };
            progress.report(format!("{date}: {status} [{}/{total}]", done + 1));
            outcomes.insert(date, outcome);
        }

        progress.report(format!("Date search finished: {} dates", outcomes.len()));
        outcomes
    }

    /// Run every job on the pool; returns one outcome per job.
    ///
    /// Outcomes arrive in completion order. Jobs whose task panicked follow
    /// at the end as `WorkerPanicked` errors.
    async fn fan_out(
        &self,
        jobs: Vec<(String, SearchParams)>,
        cancel: &CancellationToken,
        progress: Arc<ProgressReporter>,
    ) -> Vec<(String, ScraperResult<SearchOutcome>)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut pending: HashSet<String> = jobs.iter().map(|(key, _)| key.clone()).collect();

        for (key, params) in jobs {
            let searcher = self.searcher.clone();
            let recorder = self.recorder.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let token = cancel.child_token();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = token.cancelled() => return (key, Ok(SearchOutcome::Cancelled)),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (key, Ok(SearchOutcome::Cancelled)),
                    },
                };
                debug!(key = %key, "Worker started");

                let outcome = searcher.search_with(&params, false, &token, &progress).await;

                if let (Some(recorder), Ok(SearchOutcome::Completed(results))) = (&recorder, &outcome)
                    && !results.is_empty()
                    && let Ok(normalized) = params.normalize()
                {
                    recorder.record(&normalized, results).await;
                }
                (key, outcome)
            });
        }

        let mut outcomes = Vec::new();
        let mut panics = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    pending.remove(&key);
                    outcomes.push((key, outcome));
                }
                Err(e) => {
                    error!("Search worker panicked: {}", e);
                    panics.push(e.to_string());
                }
            }
        }

        let detail = panics.join("; ");
        let mut lost: Vec<String> = pending.into_iter().collect();
        lost.sort();
        for key in lost {
            outcomes.push((key, Err(ScraperError::WorkerPanicked(detail.clone()))));
        }

        info!(jobs = outcomes.len(), "Worker pool drained");
        outcomes
    }
}
