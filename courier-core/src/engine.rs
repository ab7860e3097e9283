use crate::error::{Result, SurfaceError, SurfaceResult};
use crate::protocol::{SendOutcome, SendProtocol};
use crate::queue::DispatchQueue;
use crate::surface::{LaunchOptions, SurfaceLauncher, SurfacePage};
use crate::types::{SendTask, TaskReceipt};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub launch: LaunchOptions,
    /// Bounds launch plus the initial surface load.
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    /// How long submissions are buffered before the consumer first starts.
    pub startup_window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Starting,
    Connecting,
    Ready,
    Draining,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub presentation_mode: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub queue_depth: usize,
    pub submitted: u64,
    pub attempted: u64,
    pub delivered: u64,
    pub forced: u64,
    pub failed: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub started_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_task_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// How often an idle session is checked for a dead browser.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum DrainEnd {
    Shutdown,
    SessionLost {
        error: SurfaceError,
        unsent: Option<Carryover>,
    },
}

/// A dequeued task that runs first on the next session.
struct Carryover {
    task: SendTask,
    /// The task already broke one session before its commit.
    replayed: bool,
}

/// Owns the automation session and the dispatch queue.
///
/// Submitters and the consumer loop share one `Arc<SessionManager>`; the loop
/// runs the send protocol for one task at a time and rebuilds the session
/// from scratch whenever it breaks.
pub struct SessionManager {
    launcher: Arc<dyn SurfaceLauncher>,
    protocol: SendProtocol,
    settings: EngineSettings,
    queue: DispatchQueue,
    status: RwLock<EngineStatus>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn SurfaceLauncher>,
        protocol: SendProtocol,
        settings: EngineSettings,
    ) -> Self {
        let status = EngineStatus {
            state: EngineState::Starting,
            presentation_mode: settings.launch.presentation_mode,
            retry_count: 0,
            max_retries: settings.max_retries,
            queue_depth: 0,
            submitted: 0,
            attempted: 0,
            delivered: 0,
            forced: 0,
            failed: 0,
            connects: 0,
            connect_failures: 0,
            started_at: Utc::now(),
            last_connected_at: None,
            last_task_at: None,
            last_error_at: None,
            last_error: None,
        };
        Self {
            launcher,
            protocol,
            queue: DispatchQueue::new(settings.startup_window),
            settings,
            status: RwLock::new(status),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Non-blocking. Accepted is not delivered.
    pub fn submit(&self, task: SendTask) -> Result<TaskReceipt> {
        let task_id = task.task_id().clone();
        let recipient = task.recipient().clone();
        let queue_depth = self.queue.enqueue(task)?;
        self.update(|s| s.submitted = s.submitted.saturating_add(1));
        tracing::debug!(%task_id, %recipient, queue_depth, "task enqueued");
        Ok(TaskReceipt {
            task_id,
            recipient,
            queue_depth,
        })
    }

    pub fn status(&self) -> EngineStatus {
        let mut snapshot = self
            .status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        snapshot.queue_depth = self.queue.depth();
        snapshot
    }

    pub fn state(&self) -> EngineState {
        self.status.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(shutdown).await })
    }

    #[tracing::instrument(level = "info", skip_all, fields(presentation_mode = self.settings.launch.presentation_mode))]
    pub async fn run(&self, shutdown: CancellationToken) {
        self.set_state(EngineState::Starting);
        self.queue.mark_consumer_attached();
        let mut carryover: Option<Carryover> = None;

        loop {
            self.set_state(EngineState::Connecting);
            match self.connect(&shutdown).await {
                Ok(None) => break,
                Ok(Some(page)) => {
                    self.record_connected();
                    let end = self.drain(page.as_ref(), carryover.take(), &shutdown).await;
                    if let Err(error) = page.close().await {
                        tracing::warn!(%error, "closing session failed");
                    }
                    match end {
                        DrainEnd::Shutdown => break,
                        DrainEnd::SessionLost { error, unsent } => {
                            tracing::warn!(%error, "automation session lost");
                            self.record_error(error.to_string());
                            carryover = unsent;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "connecting to surface failed");
                    self.update(|s| s.connect_failures = s.connect_failures.saturating_add(1));
                    self.record_error(error.to_string());
                }
            }

            let retries = self.enter_failed();
            if retries >= self.settings.max_retries {
                tracing::error!(
                    retries,
                    "giving up on the automation session; submissions stay queued"
                );
                break;
            }
            tracing::info!(
                retries,
                backoff_ms = self.settings.backoff.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.settings.backoff) => {}
            }
        }

        if let Some(left) = carryover {
            tracing::warn!(task_id = %left.task.task_id(), "task left unsent when the engine stopped");
        }
        self.set_state(EngineState::Stopped);
        tracing::info!("engine stopped");
    }

    /// Launches a session and loads the surface. `Ok(None)` means shutdown
    /// won the race; a page opened by then has already been closed.
    async fn connect(
        &self,
        shutdown: &CancellationToken,
    ) -> SurfaceResult<Option<Box<dyn SurfacePage>>> {
        let options = &self.settings.launch;
        let deadline = Instant::now() + self.settings.connect_timeout;
        let timed_out =
            || SurfaceError::timeout("automation session to connect", self.settings.connect_timeout);

        let launched = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            launched = timeout_at(deadline, self.launcher.launch(options)) => launched,
        };
        let page = launched.map_err(|_| timed_out())??;

        let loaded = tokio::select! {
            _ = shutdown.cancelled() => None,
            loaded = timeout_at(deadline, page.navigate(&options.surface_url)) => {
                Some(loaded.unwrap_or_else(|_| Err(timed_out())))
            }
        };
        match loaded {
            Some(Ok(())) => Ok(Some(page)),
            Some(Err(error)) => {
                close_half_open(page.as_ref()).await;
                Err(error)
            }
            None => {
                tracing::info!("shutdown requested while connecting");
                close_half_open(page.as_ref()).await;
                Ok(None)
            }
        }
    }

    async fn drain(
        &self,
        page: &dyn SurfacePage,
        mut carryover: Option<Carryover>,
        shutdown: &CancellationToken,
    ) -> DrainEnd {
        loop {
            if !page.is_alive() {
                return DrainEnd::SessionLost {
                    error: page_gone(),
                    unsent: carryover,
                };
            }

            let current = match carryover.take() {
                Some(pending) => pending,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return DrainEnd::Shutdown,
                        next = self.queue.next() => next,
                        _ = sleep(LIVENESS_POLL_INTERVAL) => continue,
                    };
                    let Some(task) = next else {
                        return DrainEnd::Shutdown;
                    };
                    Carryover {
                        task,
                        replayed: false,
                    }
                }
            };
            if !page.is_alive() {
                return DrainEnd::SessionLost {
                    error: page_gone(),
                    unsent: Some(current),
                };
            }

            self.update(|s| {
                s.state = EngineState::Draining;
                s.attempted = s.attempted.saturating_add(1);
                s.last_task_at = Some(Utc::now());
            });

            let span = tracing::info_span!(
                "send_task",
                task_id = %current.task.task_id(),
                recipient = %current.task.recipient(),
                customer = %current.task.customer_label(),
                replayed = current.replayed,
            );
            let result = AssertUnwindSafe(self.protocol.run(page, &current.task))
                .catch_unwind()
                .instrument(span)
                .await;

            match result {
                Ok(Ok(outcome)) => self.record_outcome(&current.task, &outcome),
                Ok(Err(fault)) if fault.replayable && !current.replayed => {
                    tracing::warn!(
                        task_id = %current.task.task_id(),
                        error = %fault,
                        "session broke before commit; task runs again on the next session"
                    );
                    return DrainEnd::SessionLost {
                        error: fault.error,
                        unsent: Some(Carryover {
                            task: current.task,
                            replayed: true,
                        }),
                    };
                }
                Ok(Err(fault)) => {
                    self.record_task_failure(&current.task, &fault.to_string());
                    return DrainEnd::SessionLost {
                        error: fault.error,
                        unsent: None,
                    };
                }
                Err(panic) => {
                    let reason = format!("send protocol panicked: {}", panic_message(&*panic));
                    self.record_task_failure(&current.task, &reason);
                }
            }
            self.set_state(EngineState::Ready);
        }
    }

    fn record_connected(&self) {
        self.update(|s| {
            s.state = EngineState::Ready;
            s.retry_count = 0;
            s.connects = s.connects.saturating_add(1);
            s.last_connected_at = Some(Utc::now());
        });
        tracing::info!("automation session ready");
    }

    fn record_outcome(&self, task: &SendTask, outcome: &SendOutcome) {
        match outcome {
            SendOutcome::Committed { .. } => {
                self.update(|s| s.delivered = s.delivered.saturating_add(1));
                tracing::info!(outcome = outcome.label(), "task sent");
            }
            SendOutcome::ForcedKeystroke { reason } => {
                self.update(|s| s.forced = s.forced.saturating_add(1));
                tracing::warn!(%reason, "task sent with last-resort keystroke");
            }
            SendOutcome::Abandoned { reason } => self.record_task_failure(task, reason),
        }
    }

    fn record_task_failure(&self, task: &SendTask, reason: &str) {
        tracing::warn!(task_id = %task.task_id(), %reason, "task dropped");
        self.update(|s| s.failed = s.failed.saturating_add(1));
        self.record_error(format!("task {}: {reason}", task.task_id()));
    }

    fn record_error(&self, message: String) {
        self.update(|s| {
            s.last_error_at = Some(Utc::now());
            s.last_error = Some(message);
        });
    }

    fn enter_failed(&self) -> u32 {
        let mut guard = self.status.write().unwrap_or_else(|e| e.into_inner());
        guard.state = EngineState::Failed;
        guard.retry_count = guard.retry_count.saturating_add(1);
        guard.retry_count
    }

    fn set_state(&self, state: EngineState) {
        self.update(|s| s.state = state);
    }

    fn update(&self, apply: impl FnOnce(&mut EngineStatus)) {
        let mut guard = self.status.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut guard);
    }
}

async fn close_half_open(page: &dyn SurfacePage) {
    if let Err(close_error) = page.close().await {
        tracing::debug!(%close_error, "closing half-open session failed");
    }
}

fn page_gone() -> SurfaceError {
    SurfaceError::Disconnected("page is no longer alive".to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
