use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use courier_core::{
    CommitKey, LaunchOptions, SurfaceError, SurfaceLauncher, SurfacePage, SurfaceResult,
};
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const AUTOMATION_ARGS: [&str; 4] = [
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--ignore-certificate-errors",
    "--no-first-run",
];

/// Upper bound for a single CDP request. The send protocol applies its own,
/// tighter, deadlines on top.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

const PROFILE_LOCK_FILE: &str = "SingletonLock";

pub struct ChromiumLauncher {
    request_timeout: Duration,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ChromiumLauncher {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl SurfaceLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> SurfaceResult<Box<dyn SurfacePage>> {
        prepare_profile_dir(&options.profile_dir)?;
        let config = browser_config(options, self.request_timeout)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SurfaceError::Launch(e.to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = Arc::clone(&alive);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(error) = event {
                    if is_transport_error(&error) {
                        tracing::warn!(%error, "cdp connection failed");
                        break;
                    }
                    tracing::debug!(%error, "cdp handler error");
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
            tracing::info!("cdp handler ended");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(error) => {
                handler_task.abort();
                kill_browser(&mut browser).await;
                return Err(SurfaceError::Launch(format!("opening page: {error}")));
            }
        };

        tracing::info!(
            profile_dir = %options.profile_dir.display(),
            headless = !options.presentation_mode,
            "chromium launched"
        );
        Ok(Box::new(ChromiumPage {
            browser: tokio::sync::Mutex::new(browser),
            page,
            alive,
            handler_task: std::sync::Mutex::new(Some(handler_task)),
            request_timeout: self.request_timeout,
        }))
    }
}

pub struct ChromiumPage {
    browser: tokio::sync::Mutex<Browser>,
    page: Page,
    /// Cleared by the handler task once the CDP connection is gone.
    alive: Arc<AtomicBool>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl ChromiumPage {
    fn map_error(
        &self,
        error: CdpError,
        what: &str,
        otherwise: fn(String) -> SurfaceError,
    ) -> SurfaceError {
        classify_error(error, self.is_alive(), what, self.request_timeout, otherwise)
    }

    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: CommitKey) -> SurfaceResult<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.key())
            .code(key.code())
            .windows_virtual_key_code(key.windows_virtual_key_code());
        if kind == DispatchKeyEventType::KeyDown {
            builder = builder.text(key.text()).unmodified_text(key.text());
        }
        let params = builder.build().map_err(SurfaceError::Interaction)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| self.map_error(e, "key event", SurfaceError::Interaction))?;
        Ok(())
    }

    fn abort_handler(&self) {
        let task = self
            .handler_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl SurfacePage for ChromiumPage {
    async fn navigate(&self, url: &str) -> SurfaceResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| self.map_error(e, "navigation", SurfaceError::Navigation))?;
        Ok(())
    }

    async fn has_element(&self, selector: &str) -> SurfaceResult<bool> {
        match self.page.find_element(selector).await {
            Ok(_) => Ok(true),
            Err(error) if is_transport_error(&error) || !self.is_alive() => {
                Err(self.map_error(error, selector, SurfaceError::ElementNotFound))
            }
            Err(_) => Ok(false),
        }
    }

    async fn click(&self, selector: &str) -> SurfaceResult<bool> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(error) if is_transport_error(&error) || !self.is_alive() => {
                return Err(self.map_error(error, selector, SurfaceError::ElementNotFound));
            }
            Err(_) => return Ok(false),
        };
        element
            .click()
            .await
            .map_err(|e| self.map_error(e, selector, SurfaceError::Interaction))?;
        Ok(true)
    }

    async fn press_key(&self, key: CommitKey) -> SurfaceResult<()> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, key).await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, key).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> SurfaceResult<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        if let Err(error) = &closed {
            tracing::debug!(%error, "graceful close failed; killing chromium");
            kill_browser(&mut browser).await;
        } else if let Err(error) = browser.wait().await {
            tracing::debug!(%error, "waiting for chromium to exit failed");
        }
        self.alive.store(false, Ordering::SeqCst);
        self.abort_handler();
        closed
            .map(|_| ())
            .map_err(|e| SurfaceError::Interaction(format!("closing browser: {e}")))
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.abort_handler();
    }
}

async fn kill_browser(browser: &mut Browser) {
    if let Some(error) = kill_failure(browser.kill().await) {
        tracing::debug!(%error, "killing chromium failed");
    }
}

/// `None` when the child was killed or there was no child left to kill.
fn kill_failure(result: Option<std::io::Result<()>>) -> Option<std::io::Error> {
    result.and_then(|killed| killed.err())
}

fn is_transport_error(error: &CdpError) -> bool {
    matches!(
        error,
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    )
}

fn classify_error(
    error: CdpError,
    alive: bool,
    what: &str,
    request_timeout: Duration,
    otherwise: fn(String) -> SurfaceError,
) -> SurfaceError {
    if is_transport_error(&error) || !alive {
        return SurfaceError::Disconnected(format!("{what}: {error}"));
    }
    if matches!(error, CdpError::Timeout) {
        return SurfaceError::timeout(what, request_timeout);
    }
    otherwise(format!("{what}: {error}"))
}

fn chrome_args(options: &LaunchOptions) -> Vec<String> {
    let mut args: Vec<String> = AUTOMATION_ARGS.iter().map(|a| a.to_string()).collect();
    if let Some(user_agent) = options.user_agent.as_deref().filter(|ua| !ua.trim().is_empty()) {
        args.push(format!("--user-agent={user_agent}"));
    }
    args
}

fn browser_config(options: &LaunchOptions, request_timeout: Duration) -> SurfaceResult<BrowserConfig> {
    let (width, height) = options.viewport;
    let mut builder = BrowserConfig::builder()
        .user_data_dir(&options.profile_dir)
        .window_size(width, height)
        .viewport(Viewport {
            width,
            height,
            ..Viewport::default()
        })
        .request_timeout(request_timeout);
    if options.presentation_mode {
        builder = builder.with_head();
    }
    for arg in chrome_args(options) {
        builder = builder.arg(arg);
    }
    if let Some(executable) = &options.executable {
        builder = builder.chrome_executable(executable);
    }
    builder.build().map_err(SurfaceError::Launch)
}

/// Creates the profile directory and drops a lock left behind by a crashed
/// browser. The lock is a symlink whose target is usually dangling.
fn prepare_profile_dir(profile_dir: &Path) -> SurfaceResult<()> {
    std::fs::create_dir_all(profile_dir).map_err(|e| {
        SurfaceError::Launch(format!(
            "creating profile dir {}: {e}",
            profile_dir.display()
        ))
    })?;
    let lock = profile_dir.join(PROFILE_LOCK_FILE);
    if std::fs::symlink_metadata(&lock).is_ok() {
        tracing::info!(path = %lock.display(), "removing stale profile lock");
        std::fs::remove_file(&lock).map_err(|e| {
            SurfaceError::Launch(format!("removing {}: {e}", lock.display()))
        })?;
    }
    Ok(())
}
