//! Typed event stream from a running search to its single consumer

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::{FlightResult, SearchParams};
use crate::monitor::SearchRecorder;
use crate::searcher::{FlightSearcher, SearchOutcome};

/// Everything a search reports. Exactly one terminal event
/// (`Success`, `Failure` or `Cancelled`) ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Progress(String),
    Success(Vec<FlightResult>),
    Failure { kind: ErrorKind, message: String },
    Cancelled,
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchEvent::Progress(_))
    }
}

/// Free-text progress sink that drops a message repeated within the window
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<SearchEvent>>,
    window: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl ProgressReporter {
    /// Log-only reporter
    pub fn silent() -> Self {
        Self {
            tx: None,
            window: Duration::ZERO,
            last: Mutex::new(None),
        }
    }

    pub fn new(tx: mpsc::UnboundedSender<SearchEvent>, window: Duration) -> Self {
        Self {
            tx: Some(tx),
            window,
            last: Mutex::new(None),
        }
    }

    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        let now = Instant::now();
        {
            let mut last = self.last.lock();
            if let Some((previous, at)) = last.as_ref()
                && *previous == message
                && now.duration_since(*at) < self.window
            {
                return;
            }
            *last = Some((message.clone(), now));
        }

        info!("{}", message);
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening any more
            let _ = tx.send(SearchEvent::Progress(message));
        }
    }
}

/// Caller-side handle of a spawned search
pub struct SearchHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SearchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative cancellation; the stream ends with `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the search task to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(id = %self.id, "Search task ended abnormally: {}", e);
        }
    }
}

/// Run a search in the background and stream its events.
///
/// On success the results are sent first, then recorded through `recorder`
/// when one is given. Recording failures are logged and never turn a
/// successful search into a failure.
pub fn spawn_search(
    searcher: Arc<FlightSearcher>,
    params: SearchParams,
    force_refresh: bool,
    recorder: Option<SearchRecorder>,
) -> (SearchHandle, mpsc::UnboundedReceiver<SearchEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let progress = ProgressReporter::new(tx.clone(), searcher.scraper_config().progress_dedup_window());
        let outcome = searcher
            .search_with(&params, force_refresh, &token, &progress)
            .await;

        match outcome {
            Ok(SearchOutcome::Completed(results)) => {
                let _ = tx.send(SearchEvent::Success(results.clone()));
                if let Some(recorder) = recorder
                    && !results.is_empty()
                    && let Ok(normalized) = params.normalize()
                {
                    recorder.record(&normalized, &results).await;
                }
            }
            Ok(SearchOutcome::Cancelled) => {
                let _ = tx.send(SearchEvent::Cancelled);
            }
            Err(e) => {
                warn!(id = %id, kind = %e.kind(), "Search failed: {}", e);
                let _ = tx.send(SearchEvent::Failure {
                    kind: e.kind(),
                    message: e.user_message(),
                });
            }
        }
    });

    (SearchHandle { id, cancel, task }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SearchEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SearchEvent::Progress(msg) = event {
                out.push(msg);
            }
        }
        out
    }

    #[test]
    fn repeated_message_inside_window_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx, Duration::from_secs(60));
        reporter.report("Loading");
        reporter.report("Loading");
        reporter.report("Parsing");
        reporter.report("Loading");
        assert_eq!(drain(&mut rx), vec!["Loading", "Parsing", "Loading"]);
    }

    #[test]
    fn zero_window_keeps_every_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx, Duration::ZERO);
        reporter.report("Loading");
        reporter.report("Loading");
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ProgressReporter::new(tx, Duration::ZERO).report("nobody listens");
        ProgressReporter::silent().report("nobody listens");
    }

    #[test]
    fn only_progress_is_not_terminal() {
        assert!(!SearchEvent::Progress("x".into()).is_terminal());
        assert!(SearchEvent::Cancelled.is_terminal());
        assert!(SearchEvent::Success(vec![]).is_terminal());
    }
}
