//! chromiumoxide-backed `BrowserBackend`
//!
//! Owns the Browser, its event handler task, the page and, for isolated
//! sessions, the browser context the page lives in.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::SetBlockedUrLsParams;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::Page;
use serde_json::Value;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserBackend, BrowserError, BrowserResult};

pub struct ChromiumBackend {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    /// Temporary profile to remove once the browser has exited
    user_data_dir: Option<PathBuf>,
    browser_closed: bool,
}

impl ChromiumBackend {
    pub(crate) fn new(
        browser: Browser,
        handler: JoinHandle<()>,
        user_data_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            browser,
            handler,
            page: None,
            context_id: None,
            user_data_dir,
            browser_closed: false,
        }
    }

    /// Create the working page, inside a fresh browser context when `isolated`
    pub(crate) async fn open_page(&mut self, isolated: bool) -> BrowserResult<()> {
        let mut target = CreateTargetParams::new("about:blank");

        if isolated {
            let context_id = self
                .browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await
                .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
            debug!("Created browser context {:?}", context_id);
            target.browser_context_id = Some(context_id.clone());
            self.context_id = Some(context_id);
        }

        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> BrowserResult<&Page> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    /// Remove the temporary profile (blocking)
    ///
    /// Must run after `browser.wait()` so Chrome has released its file handles.
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up temp directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up temp directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    async fn block_urls(&mut self, patterns: &[String]) -> BrowserResult<()> {
        self.page()?
            .execute(SetBlockedUrLsParams::new(patterns.to_vec()))
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> BrowserResult<Value> {
        let result = self
            .page()?
            .evaluate(expression)
            .await
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))?;
        result
            .into_value::<Value>()
            .map_err(|e| BrowserError::EvaluationFailed(e.to_string()))
    }

    async fn close_page(&mut self) -> BrowserResult<()> {
        if let Some(page) = self.page.take() {
            page.close()
                .await
                .map_err(|e| BrowserError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    async fn close_context(&mut self) -> BrowserResult<()> {
        if let Some(context_id) = self.context_id.take() {
            self.browser
                .dispose_browser_context(context_id)
                .await
                .map_err(|e| BrowserError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    async fn close_browser(&mut self) -> BrowserResult<()> {
        if self.browser_closed {
            return Ok(());
        }
        self.browser_closed = true;
        self.browser
            .close()
            .await
            .map_err(|e| BrowserError::IoError(e.to_string()))?;
        self.browser
            .wait()
            .await
            .map_err(|e| BrowserError::IoError(e.to_string()))?;
        Ok(())
    }

    async fn shutdown_controller(&mut self) -> BrowserResult<()> {
        self.handler.abort();
        self.cleanup_temp_dir();
        Ok(())
    }
}

impl Drop for ChromiumBackend {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop kills the child process if it is still running

        if let Some(path) = &self.user_data_dir {
            warn!(
                "ChromiumBackend dropped without explicit shutdown. \
                Temp directory will be orphaned: {}",
                path.display()
            );
        }
    }
}
