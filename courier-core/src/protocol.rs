use crate::error::{SessionFault, SurfaceError, SurfaceResult};
use crate::surface::{CommitKey, SurfacePage};
use crate::types::{Recipient, SendTask};
use serde::Serialize;
use tokio::time::{Duration, Instant, sleep, timeout};

#[derive(Debug, Clone)]
pub struct ProtocolTimings {
    pub navigation_timeout: Duration,
    pub marker_timeout: Duration,
    /// Pause after the conversation is ready, before touching the UI.
    pub settle: Duration,
    /// How long to keep looking for the send control before falling back.
    pub control_wait: Duration,
    pub poll_interval: Duration,
    /// Hold after every attempted send.
    pub cooldown: Duration,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            marker_timeout: Duration::from_secs(40),
            settle: Duration::from_secs(2),
            control_wait: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// One step of the commit fallback chain, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStrategy {
    ClickControl { selector: String },
    PressKey(CommitKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitVia {
    ClickControl,
    PressKey,
}

impl CommitStrategy {
    fn via(&self) -> CommitVia {
        match self {
            Self::ClickControl { .. } => CommitVia::ClickControl,
            Self::PressKey(_) => CommitVia::PressKey,
        }
    }

    /// `Ok(false)` means the strategy did not apply and the next one should
    /// run.
    async fn attempt(
        &self,
        page: &dyn SurfacePage,
        timings: &ProtocolTimings,
    ) -> SurfaceResult<bool> {
        match self {
            Self::ClickControl { selector } => {
                let deadline = Instant::now() + timings.control_wait;
                loop {
                    if page.click(selector).await? {
                        return Ok(true);
                    }
                    if Instant::now() + timings.poll_interval > deadline {
                        return Ok(false);
                    }
                    sleep(timings.poll_interval).await;
                }
            }
            Self::PressKey(key) => {
                page.press_key(*key).await?;
                Ok(true)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Committed { via: CommitVia },
    /// The regular chain failed and the last-resort keystroke went out.
    ForcedKeystroke { reason: String },
    Abandoned { reason: String },
}

impl SendOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::ForcedKeystroke { .. } => "forced_keystroke",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

pub fn deep_link(surface_url: &str, recipient: &Recipient, message_text: &str) -> String {
    format!(
        "{}/send?phone={}&text={}",
        surface_url.trim_end_matches('/'),
        recipient,
        urlencoding::encode(message_text)
    )
}

/// Best-effort delivery of one task through a live page.
///
/// Every outcome that only concerns the task comes back as `Ok`; `Err` is
/// reserved for failures that mean the session itself is gone, and says
/// whether the task broke it before anything was committed.
#[derive(Debug, Clone)]
pub struct SendProtocol {
    surface_url: String,
    ready_marker: String,
    strategies: Vec<CommitStrategy>,
    last_resort: CommitKey,
    timings: ProtocolTimings,
}

impl SendProtocol {
    pub fn new(
        surface_url: impl Into<String>,
        ready_marker: impl Into<String>,
        send_control_selector: impl Into<String>,
        timings: ProtocolTimings,
    ) -> Self {
        Self {
            surface_url: surface_url.into(),
            ready_marker: ready_marker.into(),
            strategies: vec![
                CommitStrategy::ClickControl {
                    selector: send_control_selector.into(),
                },
                CommitStrategy::PressKey(CommitKey::Enter),
            ],
            last_resort: CommitKey::Enter,
            timings,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<CommitStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn strategies(&self) -> &[CommitStrategy] {
        &self.strategies
    }

    pub fn timings(&self) -> &ProtocolTimings {
        &self.timings
    }

    pub fn surface_url(&self) -> &str {
        &self.surface_url
    }

    pub async fn run(&self, page: &dyn SurfacePage, task: &SendTask) -> Result<SendOutcome, SessionFault> {
        let link = deep_link(&self.surface_url, task.recipient(), task.message_text());
        match timeout(self.timings.navigation_timeout, page.navigate(&link)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_session_fatal() => return Err(SessionFault::before_commit(e)),
            Ok(Err(e)) => {
                return Ok(SendOutcome::Abandoned {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Ok(SendOutcome::Abandoned {
                    reason: SurfaceError::timeout("conversation page load", self.timings.navigation_timeout)
                        .to_string(),
                });
            }
        }

        let outcome = match self.wait_for_marker(page).await {
            Err(e) if e.is_session_fatal() => return Err(SessionFault::before_commit(e)),
            Err(e) => self.force_commit(page, e).await?,
            Ok(()) => {
                sleep(self.timings.settle).await;
                match self.commit(page).await {
                    Ok(via) => {
                        tracing::info!(?via, "message committed");
                        SendOutcome::Committed { via }
                    }
                    Err(e) if e.is_session_fatal() => return Err(SessionFault::during_commit(e)),
                    Err(e) => self.force_commit(page, e).await?,
                }
            }
        };

        sleep(self.timings.cooldown).await;
        Ok(outcome)
    }

    async fn commit(&self, page: &dyn SurfacePage) -> SurfaceResult<CommitVia> {
        for strategy in &self.strategies {
            if strategy.attempt(page, &self.timings).await? {
                return Ok(strategy.via());
            }
            tracing::debug!(?strategy, "commit strategy did not apply");
        }
        Err(SurfaceError::ElementNotFound(
            "no commit strategy applied".to_string(),
        ))
    }

    /// Presses the last-resort key once after the regular chain gave up.
    async fn force_commit(
        &self,
        page: &dyn SurfacePage,
        cause: SurfaceError,
    ) -> Result<SendOutcome, SessionFault> {
        tracing::warn!(error = %cause, "commit chain failed; forcing keystroke");
        match page.press_key(self.last_resort).await {
            Ok(()) => Ok(SendOutcome::ForcedKeystroke {
                reason: cause.to_string(),
            }),
            Err(inner) if inner.is_session_fatal() => Err(SessionFault::during_commit(inner)),
            Err(inner) => Ok(SendOutcome::Abandoned {
                reason: format!("{cause}; last-resort keystroke failed: {inner}"),
            }),
        }
    }

    async fn wait_for_marker(&self, page: &dyn SurfacePage) -> SurfaceResult<()> {
        let deadline = Instant::now() + self.timings.marker_timeout;
        loop {
            if page.has_element(&self.ready_marker).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SurfaceError::timeout(
                    format!("conversation marker {:?}", self.ready_marker),
                    self.timings.marker_timeout,
                ));
            }
            sleep(self.timings.poll_interval).await;
        }
    }
}
