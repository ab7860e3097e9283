use crate::error::SurfaceResult;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

/// Launch parameters for one automation context.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub surface_url: String,
    /// Profile directory; login state lives here across restarts.
    pub profile_dir: PathBuf,
    /// Render the browser window instead of running headless.
    pub presentation_mode: bool,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
    pub executable: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKey {
    Enter,
}

impl CommitKey {
    pub fn key(self) -> &'static str {
        match self {
            Self::Enter => "Enter",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Enter => "Enter",
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Enter => "\r",
        }
    }

    pub fn windows_virtual_key_code(self) -> i64 {
        match self {
            Self::Enter => 13,
        }
    }
}

/// Opens a fresh automation context. Each call must return an independent
/// context; the caller closes it before launching another.
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> SurfaceResult<Box<dyn SurfacePage>>;
}

/// A live page on the messaging surface.
///
/// Implementations report what happened and leave waiting and timeouts to the
/// caller.
#[async_trait]
pub trait SurfacePage: Send + Sync {
    /// Navigate and return once the page reports loaded.
    async fn navigate(&self, url: &str) -> SurfaceResult<()>;

    async fn has_element(&self, selector: &str) -> SurfaceResult<bool>;

    /// Click the first element matching `selector`. `Ok(false)` when nothing
    /// matches.
    async fn click(&self, selector: &str) -> SurfaceResult<bool>;

    /// Dispatch a key press on whatever currently has focus.
    async fn press_key(&self, key: CommitKey) -> SurfaceResult<()>;

    fn is_alive(&self) -> bool;

    async fn close(&self) -> SurfaceResult<()>;
}
