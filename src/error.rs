//! Error taxonomy for the scrape engine and the persistence layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error classification callers pattern-match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BrowserInit,
    Network,
    DataExtraction,
    ManualModeActivation,
    InvalidInput,
    WorkerPanicked,
    Cancelled,
}

impl ErrorKind {
    /// Stable tag used in UI events and logs
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BrowserInit => "browser_init",
            ErrorKind::Network => "network",
            ErrorKind::DataExtraction => "data_extraction",
            ErrorKind::ManualModeActivation => "manual_mode_activation",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::WorkerPanicked => "worker_panicked",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while driving a search
///
/// `Cancelled` only travels inside the engine. `FlightSearcher::search`
/// converts it into `SearchOutcome::Cancelled` before returning.
#[derive(Error, Debug, Clone)]
pub enum ScraperError {
    #[error("No supported browser could be started: {message}")]
    BrowserInit {
        message: String,
        /// One line per engine that was tried
        attempts: Vec<String>,
    },

    #[error("Network failure loading {url}: {message}")]
    Network { url: String, message: String },

    #[error("Flight data could not be extracted: {0}")]
    DataExtraction(String),

    #[error("Manual browser session could not be opened: {0}")]
    ManualModeActivation(String),

    #[error("Invalid search: {0}")]
    InvalidSearch(String),

    /// A pooled search task died before producing an outcome
    #[error("Search worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Search cancelled")]
    Cancelled,
}

impl ScraperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScraperError::BrowserInit { .. } => ErrorKind::BrowserInit,
            ScraperError::Network { .. } => ErrorKind::Network,
            ScraperError::DataExtraction(_) => ErrorKind::DataExtraction,
            ScraperError::ManualModeActivation(_) => ErrorKind::ManualModeActivation,
            ScraperError::InvalidSearch(_) => ErrorKind::InvalidInput,
            ScraperError::WorkerPanicked(_) => ErrorKind::WorkerPanicked,
            ScraperError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn network(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ScraperError::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Whether the searcher retries this failure on its own
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScraperError::Network { .. })
    }

    /// Plain-language guidance for the kind, followed by the raw detail
    pub fn user_message(&self) -> String {
        let guidance = match self.kind() {
            ErrorKind::BrowserInit => {
                "Install Google Chrome or Microsoft Edge, or allow the bundled Chromium download, then retry."
            }
            ErrorKind::Network => {
                "The search site could not be reached. Check the network connection and retry."
            }
            ErrorKind::DataExtraction => {
                "The result page loaded but no fares could be read. Open a manual browser session to continue."
            }
            ErrorKind::ManualModeActivation => {
                "The manual browser window could not be opened. Close other browser windows using the profile and retry."
            }
            ErrorKind::InvalidInput => "Check the airport codes and dates of the search.",
            ErrorKind::WorkerPanicked => "The search stopped unexpectedly. Retry it on its own.",
            ErrorKind::Cancelled => "The search was cancelled.",
        };

        match self {
            ScraperError::BrowserInit { attempts, .. } if !attempts.is_empty() => {
                format!("{guidance}\n\nTried:\n  - {}\n\nDetail: {self}", attempts.join("\n  - "))
            }
            ScraperError::Cancelled => guidance.to_string(),
            _ => format!("{guidance}\n\nDetail: {self}"),
        }
    }
}

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type ScraperResult<T> = Result<T, ScraperError>;
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(
            ScraperError::network("https://x", "timeout").kind(),
            ErrorKind::Network
        );
        assert_eq!(
            ScraperError::DataExtraction("empty".into()).kind(),
            ErrorKind::DataExtraction
        );
        assert_eq!(ScraperError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            ScraperError::WorkerPanicked("boom".into()).kind(),
            ErrorKind::WorkerPanicked
        );
    }

    #[test]
    fn only_network_failures_retry() {
        assert!(ScraperError::network("u", "e").is_retryable());
        assert!(!ScraperError::DataExtraction("e".into()).is_retryable());
        assert!(
            !ScraperError::BrowserInit {
                message: "none".into(),
                attempts: vec![]
            }
            .is_retryable()
        );
    }

    #[test]
    fn guidance_precedes_raw_detail() {
        let err = ScraperError::BrowserInit {
            message: "all engines failed".into(),
            attempts: vec!["Chrome: not found".into(), "Edge: not found".into()],
        };
        let msg = err.user_message();
        assert!(msg.starts_with("Install Google Chrome"));
        assert!(msg.contains("Chrome: not found"));
        assert!(msg.ends_with("all engines failed"));
    }
}
