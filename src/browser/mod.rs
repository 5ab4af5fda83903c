//! Browser infrastructure seams and the chromiumoxide implementation
//!
//! `Launcher` starts one engine and hands back a `BrowserBackend` holding a
//! single open page. `BrowserSession` drives everything through these two
//! traits so a scripted backend can stand in for Chrome.

mod wrapper;

pub use wrapper::ChromiumBackend;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::browser_setup::{Engine, LaunchOptions};

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to find browser executable: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Script evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Browser already closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// One running engine with one page
///
/// The four close steps are called innermost first and each exactly once.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Refuse requests whose URL matches any of the patterns
    async fn block_urls(&mut self, patterns: &[String]) -> BrowserResult<()>;

    /// Load a URL and wait for the navigation to settle
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    async fn evaluate(&mut self, expression: &str) -> BrowserResult<Value>;

    async fn close_page(&mut self) -> BrowserResult<()>;

    async fn close_context(&mut self) -> BrowserResult<()>;

    async fn close_browser(&mut self) -> BrowserResult<()>;

    /// Stop the CDP handler task and remove a temporary profile
    async fn shutdown_controller(&mut self) -> BrowserResult<()>;
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        engine: Engine,
        options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserBackend>>;
}
