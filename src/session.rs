//! One browser engine instance and its navigation and extraction surface

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserBackend, Launcher};
use crate::browser_setup::{Engine, LaunchOptions};
use crate::error::{ScraperError, ScraperResult};
use crate::model::RawFlightRow;
use crate::scripts::{self, ScriptArgs, ScriptId};
use crate::utils::constants::BLOCKED_RESOURCE_PATTERNS;
use crate::utils::{Backoff, sleep_or_cancel};

/// Upper bound on each close step so a wedged engine cannot stall teardown
const CLOSE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one scroll-check pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollState {
    pub can_scroll: bool,
    pub reached_bottom: bool,
}

pub struct BrowserSession {
    backend: Option<Box<dyn BrowserBackend>>,
    engine: Engine,
    cancel: CancellationToken,
}

impl BrowserSession {
    /// Start the first engine that launches, trying them in priority order.
    ///
    /// Each engine gets `launch_timeout`. Fails with `BrowserInit` carrying
    /// one line per attempt when none of them starts.
    pub async fn open(
        launcher: &dyn Launcher,
        options: &LaunchOptions,
        launch_timeout: Duration,
        cancel: CancellationToken,
    ) -> ScraperResult<Self> {
        let mut attempts = Vec::with_capacity(Engine::PRIORITY.len());

        for engine in Engine::PRIORITY {
            if cancel.is_cancelled() {
                return Err(ScraperError::Cancelled);
            }
            debug!(%engine, mode = ?options.mode, "Launching browser engine");

            let launched = tokio::select! {
                _ = cancel.cancelled() => return Err(ScraperError::Cancelled),
                r = tokio::time::timeout(launch_timeout, launcher.launch(engine, options)) => r,
            };

            match launched {
                Ok(Ok(backend)) => {
                    info!(%engine, "Browser engine started");
                    let mut session = Self {
                        backend: Some(backend),
                        engine,
                        cancel,
                    };
                    if options.block_resources && options.mode.is_headless() {
                        session.block_resources().await;
                    }
                    return Ok(session);
                }
                Ok(Err(e)) => {
                    warn!(%engine, "Browser engine failed to start: {e}");
                    attempts.push(format!("{engine}: {e}"));
                }
                Err(_) => {
                    warn!(%engine, "Browser engine launch timed out");
                    attempts.push(format!(
                        "{engine}: launch timed out after {}ms",
                        launch_timeout.as_millis()
                    ));
                }
            }
        }

        Err(ScraperError::BrowserInit {
            message: format!("all {} browser engines failed to start", attempts.len()),
            attempts,
        })
    }

    async fn block_resources(&mut self) {
        let patterns: Vec<String> = BLOCKED_RESOURCE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        if let Some(backend) = self.backend.as_mut() {
            match backend.block_urls(&patterns).await {
                Ok(()) => debug!("Blocking image, media and font requests"),
                Err(e) => warn!("Resource blocking unavailable: {e}"),
            }
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn check_cancelled(&self) -> ScraperResult<()> {
        if self.cancel.is_cancelled() {
            Err(ScraperError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancellable pause between extraction passes
    pub async fn pause(&self, duration: Duration) -> ScraperResult<()> {
        if sleep_or_cancel(duration, &self.cancel).await {
            Ok(())
        } else {
            Err(ScraperError::Cancelled)
        }
    }

    /// Load `url`; a timeout or connection failure is a `Network` error
    pub async fn navigate(&mut self, url: &str, timeout: Duration) -> ScraperResult<()> {
        self.check_cancelled()?;
        let cancel = self.cancel.clone();
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| ScraperError::network(url, "browser session is closed"))?;

        info!(url = %url, "Navigating");
        tokio::select! {
            _ = cancel.cancelled() => Err(ScraperError::Cancelled),
            r = tokio::time::timeout(timeout, backend.goto(url)) => match r {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ScraperError::network(url, e)),
                Err(_) => Err(ScraperError::network(
                    url,
                    format!("page load timed out after {}ms", timeout.as_millis()),
                )),
            },
        }
    }

    /// Evaluate one named procedure and return its raw value
    pub async fn evaluate(&mut self, id: ScriptId, args: &ScriptArgs) -> ScraperResult<Value> {
        self.check_cancelled()?;
        let cancel = self.cancel.clone();
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| ScraperError::DataExtraction("browser session is closed".into()))?;

        let expression = scripts::render(id, args);
        tokio::select! {
            _ = cancel.cancelled() => Err(ScraperError::Cancelled),
            r = backend.evaluate(&expression) => {
                r.map_err(|e| ScraperError::DataExtraction(format!("{id} failed: {e}")))
            }
        }
    }

    /// Run a row-producing procedure once.
    ///
    /// An empty list is returned as-is; anything that is not a list of rows
    /// is a `DataExtraction` error.
    pub async fn run_extraction(
        &mut self,
        id: ScriptId,
        args: &ScriptArgs,
    ) -> ScraperResult<Vec<RawFlightRow>> {
        if !id.yields_rows() {
            return Err(ScraperError::DataExtraction(format!(
                "{id} does not return flight rows"
            )));
        }
        let value = self.evaluate(id, args).await?;
        parse_rows(id, value)
    }

    /// Poll a row-producing procedure until it yields rows or `wait` elapses.
    ///
    /// Still empty at the deadline is a `DataExtraction` error.
    pub async fn extract_until_rows(
        &mut self,
        id: ScriptId,
        args: &ScriptArgs,
        wait: Duration,
    ) -> ScraperResult<Vec<RawFlightRow>> {
        let mut backoff = Backoff::new(wait);
        loop {
            let rows = self.run_extraction(id, args).await?;
            if !rows.is_empty() {
                return Ok(rows);
            }
            if backoff.expired() {
                return Err(ScraperError::DataExtraction(format!(
                    "{id} returned no rows within {}ms",
                    wait.as_millis()
                )));
            }
            if !backoff.wait(&self.cancel).await {
                return Err(ScraperError::Cancelled);
            }
        }
    }

    /// Poll a boolean procedure until it reports true. `Ok(false)` on timeout.
    pub async fn wait_for_condition(
        &mut self,
        id: ScriptId,
        args: &ScriptArgs,
        timeout: Duration,
    ) -> ScraperResult<bool> {
        let mut backoff = Backoff::new(timeout);
        loop {
            match self.evaluate(id, args).await {
                Ok(Value::Bool(true)) => return Ok(true),
                Ok(_) => {}
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                // the page may be between documents
                Err(e) => debug!("{id} probe failed: {e}"),
            }
            if backoff.expired() {
                return Ok(false);
            }
            if !backoff.wait(&self.cancel).await {
                return Err(ScraperError::Cancelled);
            }
        }
    }

    pub async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> ScraperResult<bool> {
        self.wait_for_condition(
            ScriptId::SelectorPresent,
            &ScriptArgs::Selector(selector.to_string()),
            timeout,
        )
        .await
    }

    /// Scroll once, by window or by the result container
    pub async fn scroll_step(&mut self) -> ScraperResult<ScrollState> {
        let value = self.evaluate(ScriptId::ScrollCheck, &ScriptArgs::None).await?;
        Ok(serde_json::from_value(value).unwrap_or(ScrollState {
            can_scroll: false,
            reached_bottom: true,
        }))
    }

    pub async fn page_height(&mut self) -> ScraperResult<i64> {
        let value = self.evaluate(ScriptId::PageHeight, &ScriptArgs::None).await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Jump to the bottom up to `max_iterations` times so lazy lists load.
    ///
    /// Stops once the page height is unchanged after the third pass and
    /// returns the number of passes made.
    pub async fn scroll_to_load_more(
        &mut self,
        max_iterations: u32,
        pause: Duration,
    ) -> ScraperResult<u32> {
        let mut passes = 0;
        let mut last_height = self.page_height().await?;
        for i in 0..max_iterations {
            self.evaluate(ScriptId::ScrollToBottom, &ScriptArgs::None)
                .await?;
            self.pause(pause).await?;
            passes += 1;

            let height = self.page_height().await?;
            if height == last_height && i > 2 {
                break;
            }
            last_height = height;
        }
        Ok(passes)
    }

    /// Release page, context, browser and controller, innermost first.
    ///
    /// Every step is attempted even when an earlier one fails; failures are
    /// logged. Calling this on a closed session does nothing.
    pub async fn close(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        info!(engine = %self.engine, "Closing browser session");

        match tokio::time::timeout(CLOSE_STEP_TIMEOUT, backend.close_page()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close page: {e}"),
            Err(_) => warn!("Timed out closing page"),
        }
        match tokio::time::timeout(CLOSE_STEP_TIMEOUT, backend.close_context()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close browser context: {e}"),
            Err(_) => warn!("Timed out closing browser context"),
        }
        match tokio::time::timeout(CLOSE_STEP_TIMEOUT, backend.close_browser()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close browser: {e}"),
            Err(_) => warn!("Timed out closing browser"),
        }
        match tokio::time::timeout(CLOSE_STEP_TIMEOUT, backend.shutdown_controller()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to stop browser controller: {e}"),
            Err(_) => warn!("Timed out stopping browser controller"),
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.backend.is_some() {
            warn!(
                engine = %self.engine,
                "BrowserSession dropped without close(); relying on backend drop"
            );
        }
    }
}

fn parse_rows(id: ScriptId, value: Value) -> ScraperResult<Vec<RawFlightRow>> {
    match value {
        Value::Array(_) => serde_json::from_value(value)
            .map_err(|e| ScraperError::DataExtraction(format!("{id} returned malformed rows: {e}"))),
        Value::Null => Ok(Vec::new()),
        other => Err(ScraperError::DataExtraction(format!(
            "{id} returned {} instead of a row list",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
