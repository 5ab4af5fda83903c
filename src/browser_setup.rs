use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use crate::browser::{BrowserBackend, BrowserError, BrowserResult, ChromiumBackend, Launcher};
use crate::utils::constants::CHROME_USER_AGENT;

/// Browser engines in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Chrome,
    Edge,
    /// `CHROMIUM_PATH`, a system Chromium, or a managed download
    Chromium,
}

impl Engine {
    pub const PRIORITY: [Engine; 3] = [Engine::Chrome, Engine::Edge, Engine::Chromium];

    pub fn label(self) -> &'static str {
        match self {
            Engine::Chrome => "Google Chrome",
            Engine::Edge => "Microsoft Edge",
            Engine::Chromium => "Chromium",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Unattended search in a throwaway profile
    Headless,
    Visible,
    /// Visible window on an on-disk profile that outlives the session
    PersistentProfile(PathBuf),
}

impl SessionMode {
    pub fn is_headless(&self) -> bool {
        matches!(self, SessionMode::Headless)
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, SessionMode::PersistentProfile(_))
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub mode: SessionMode,
    pub window_width: u32,
    pub window_height: u32,
    /// Block image, media and font requests; honored in headless mode only
    pub block_resources: bool,
}

impl LaunchOptions {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            window_width: 1400,
            window_height: 900,
            block_resources: false,
        }
    }

    pub fn from_config(mode: SessionMode, config: &crate::BrowserConfig) -> Self {
        Self {
            mode,
            window_width: config.window.width,
            window_height: config.window.height,
            block_resources: config.block_resources,
        }
    }
}

/// RAII guard for temporary directory cleanup
///
/// Removes the directory on drop unless consumed by `into_path()`.
struct TempDirGuard {
    path: PathBuf,
    keep: bool,
}

impl TempDirGuard {
    fn new(path: PathBuf) -> BrowserResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| {
            BrowserError::IoError(format!(
                "Failed to create user data directory {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { path, keep: false })
    }

    fn into_path(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to clean up temp dir {}: {}", self.path.display(), e);
            } else {
                info!(
                    "Cleaned up temp dir after launch failure: {}",
                    self.path.display()
                );
            }
        }
    }
}

/// Launches real engines through chromiumoxide
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    /// Allow fetching a managed Chromium when none is installed
    pub allow_download: bool,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self {
            allow_download: true,
        }
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(
        &self,
        engine: Engine,
        options: &LaunchOptions,
    ) -> BrowserResult<Box<dyn BrowserBackend>> {
        let executable = match find_engine_executable(engine) {
            Ok(path) => path,
            Err(e) if engine == Engine::Chromium && self.allow_download => {
                info!("{e}; falling back to a managed Chromium download");
                download_managed_browser().await?
            }
            Err(e) => return Err(e),
        };

        let (browser, handler, temp_dir) = launch_browser(executable, options).await?;
        let mut backend = ChromiumBackend::new(browser, handler, temp_dir);

        if let Err(e) = backend.open_page(!options.mode.is_persistent()).await {
            abandon_backend(&mut backend, engine).await;
            return Err(e);
        }
        Ok(Box::new(backend))
    }
}

/// Tear down a backend whose page never opened; both steps always run
async fn abandon_backend(backend: &mut dyn BrowserBackend, engine: Engine) {
    if let Err(e) = backend.close_browser().await {
        warn!(%engine, "Failed to close half-open browser: {e}");
    }
    if let Err(e) = backend.shutdown_controller().await {
        warn!(%engine, "Failed to stop browser controller: {e}");
    }
}

fn engine_paths(engine: Engine) -> Vec<&'static str> {
    match engine {
        Engine::Chrome if cfg!(target_os = "windows") => vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"%LOCALAPPDATA%\Google\Chrome\Application\chrome.exe",
        ],
        Engine::Chrome if cfg!(target_os = "macos") => vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Google Chrome Beta.app/Contents/MacOS/Google Chrome Beta",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ],
        Engine::Chrome => vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/opt/google/chrome/chrome",
        ],
        Engine::Edge if cfg!(target_os = "windows") => vec![
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
            r"%LOCALAPPDATA%\Microsoft\Edge\Application\msedge.exe",
        ],
        Engine::Edge if cfg!(target_os = "macos") => vec![
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ],
        Engine::Edge => vec![
            "/usr/bin/microsoft-edge",
            "/usr/bin/microsoft-edge-stable",
            "/opt/microsoft/msedge/msedge",
        ],
        Engine::Chromium if cfg!(target_os = "windows") => vec![
            r"C:\Program Files\Chromium\Application\chrome.exe",
            r"C:\Program Files (x86)\Chromium\Application\chrome.exe",
        ],
        Engine::Chromium if cfg!(target_os = "macos") => vec![
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ],
        Engine::Chromium => vec![
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
        ],
    }
}

fn which_names(engine: Engine) -> &'static [&'static str] {
    match engine {
        Engine::Chrome => &["google-chrome", "google-chrome-stable", "chrome"],
        Engine::Edge => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        Engine::Chromium => &["chromium", "chromium-browser"],
    }
}

/// Find the executable of one engine with platform-specific search paths
pub fn find_engine_executable(engine: Engine) -> BrowserResult<PathBuf> {
    // CHROMIUM_PATH overrides discovery for the Chromium slot
    if engine == Engine::Chromium
        && let Ok(path) = std::env::var("CHROMIUM_PATH")
    {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(
                "Using browser from CHROMIUM_PATH environment variable: {}",
                path.display()
            );
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH environment variable points to non-existent file: {}",
            path.display()
        );
    }

    for path_str in engine_paths(engine) {
        let path = if let Some(rest) = path_str.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            }
        } else if path_str.contains('%') && cfg!(target_os = "windows") {
            PathBuf::from(expand_windows_env_vars(path_str))
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            info!("Found {} at: {}", engine, path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in which_names(engine) {
            let output = Command::new("which").arg(cmd).output();

            if let Ok(output) = output
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("Found {} using 'which': {}", engine, path.display());
                    return Ok(path);
                }
            }
        }
    }

    Err(BrowserError::NotFound(format!("{engine} executable not found")))
}

/// Expand `%VAR%` tokens; unknown variables keep their original token
fn expand_windows_env_vars(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '%' {
            let var_name: String = chars.by_ref().take_while(|&c| c != '%').collect();

            if var_name.is_empty() {
                result.push('%');
            } else if let Ok(value) = std::env::var(&var_name) {
                result.push_str(&value);
            } else {
                result.push('%');
                result.push_str(&var_name);
                result.push('%');
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Download a managed Chromium into the user cache and return its executable
pub async fn download_managed_browser() -> BrowserResult<PathBuf> {
    info!("Downloading managed Chromium browser...");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| {
            let fallback = std::env::temp_dir().join(".cache");
            warn!(
                "Could not determine system cache directory, using temp directory fallback: {}",
                fallback.display()
            );
            fallback
        })
        .join("fare-scout/chromium");

    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| BrowserError::IoError(format!("Failed to create cache directory: {e}")))?;

    let options = BrowserFetcherOptions::builder()
        .with_path(&cache_dir)
        .build()
        .map_err(|e| BrowserError::NotFound(format!("Failed to build fetcher options: {e}")))?;

    let revision_info = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| BrowserError::NotFound(format!("Failed to fetch browser: {e}")))?;

    info!(
        "Downloaded Chromium to: {}",
        revision_info.folder_path.display()
    );

    Ok(revision_info.executable_path)
}

/// Launch one executable with the stealth flag set.
///
/// Persistent sessions run on their profile directory and keep it. Every
/// other mode gets a unique temporary profile which is returned so the
/// backend can remove it after the browser exits.
pub async fn launch_browser(
    executable: PathBuf,
    options: &LaunchOptions,
) -> BrowserResult<(Browser, JoinHandle<()>, Option<PathBuf>)> {
    let (user_data_dir, temp_guard) = match &options.mode {
        SessionMode::PersistentProfile(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                BrowserError::IoError(format!(
                    "Failed to create profile directory {}: {e}",
                    dir.display()
                ))
            })?;
            (dir.clone(), None)
        }
        _ => {
            let path = std::env::temp_dir().join(format!(
                "fare_scout_chrome_{}_{}",
                std::process::id(),
                uuid::Uuid::new_v4().simple()
            ));
            let guard = TempDirGuard::new(path.clone())?;
            (path, Some(guard))
        }
    };

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(options.window_width, options.window_height)
        .user_data_dir(user_data_dir)
        .chrome_executable(executable);

    if options.mode.is_headless() {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    config_builder = config_builder
        .arg(format!("--user-agent={}", CHROME_USER_AGENT))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-print-preview")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-features=TranslateUI")
        .arg("--disable-hang-monitor")
        .arg("--disable-prompt-on-repost")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--mute-audio")
        .arg("--lang=ko-KR");

    if should_disable_sandbox() {
        info!("Detected containerized environment, disabling sandbox");
        config_builder = config_builder
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");
    }

    let browser_config = config_builder
        .build()
        .map_err(|e| BrowserError::LaunchFailed(format!("Failed to build browser config: {e}")))?;

    info!("Launching browser with config: {:?}", browser_config);
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                let error_msg = e.to_string();

                // chromiumoxide cannot decode some newer CDP events; those are noise
                let is_benign_serialization_error = error_msg
                    .contains("data did not match any variant of untagged enum Message")
                    || error_msg.contains("Failed to deserialize WS response");

                if is_benign_serialization_error {
                    trace!("Suppressed benign CDP serialization error: {}", error_msg);
                } else {
                    error!("Browser handler error: {:?}", e);
                }
            }
        }
        info!("Browser handler task completed");
    });

    let temp_dir = temp_guard.map(TempDirGuard::into_path);
    Ok((browser, handler_task, temp_dir))
}

/// In containers the setuid sandbox is unavailable
fn should_disable_sandbox() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engines_are_tried_chrome_edge_chromium() {
        assert_eq!(
            Engine::PRIORITY,
            [Engine::Chrome, Engine::Edge, Engine::Chromium]
        );
    }

    #[test]
    fn unknown_windows_vars_keep_their_token() {
        let expanded = expand_windows_env_vars(r"%FARE_SCOUT_SURELY_UNSET%\chrome.exe");
        assert_eq!(expanded, r"%FARE_SCOUT_SURELY_UNSET%\chrome.exe");
        assert_eq!(expand_windows_env_vars("100%%"), "100%");
    }

    #[test]
    fn temp_guard_removes_directory_unless_kept() {
        let root = tempfile::tempdir().unwrap();
        let dropped = root.path().join("dropped");
        drop(TempDirGuard::new(dropped.clone()).unwrap());
        assert!(!dropped.exists());

        let kept = root.path().join("kept");
        let path = TempDirGuard::new(kept.clone()).unwrap().into_path();
        assert_eq!(path, kept);
        assert!(kept.exists());
    }

    #[derive(Default)]
    struct FailingTeardown {
        steps: Vec<&'static str>,
    }

    #[async_trait]
    impl BrowserBackend for FailingTeardown {
        async fn block_urls(&mut self, _patterns: &[String]) -> BrowserResult<()> {
            Ok(())
        }
        async fn goto(&mut self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn evaluate(&mut self, _expression: &str) -> BrowserResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn close_page(&mut self) -> BrowserResult<()> {
            Ok(())
        }
        async fn close_context(&mut self) -> BrowserResult<()> {
            Ok(())
        }
        async fn close_browser(&mut self) -> BrowserResult<()> {
            self.steps.push("browser");
            Err(BrowserError::Closed)
        }
        async fn shutdown_controller(&mut self) -> BrowserResult<()> {
            self.steps.push("controller");
            Err(BrowserError::Closed)
        }
    }

    #[tokio::test]
    async fn abandoned_backend_stops_controller_after_close_error() {
        let mut backend = FailingTeardown::default();
        abandon_backend(&mut backend, Engine::Edge).await;
        assert_eq!(backend.steps, vec!["browser", "controller"]);
    }

    #[test]
    fn only_persistent_mode_keeps_profile() {
        assert!(SessionMode::PersistentProfile("/tmp/p".into()).is_persistent());
        assert!(!SessionMode::Visible.is_persistent());
        assert!(SessionMode::Headless.is_headless());
    }
}
