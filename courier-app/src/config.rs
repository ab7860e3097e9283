//! Courier configuration loader.
//!
//! `~/.courier/config.toml` by default; every section is optional and falls
//! back to the values below.

use anyhow::Result;
use courier_core::{
    DEFAULT_FALLBACK_TEMPLATE, DialPlan, EngineSettings, LaunchOptions, ProtocolTimings,
    SendProtocol,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dialing: DialingConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5001".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialingConfig {
    #[serde(default = "default_country_prefix")]
    pub country_prefix: String,
    /// Numbers at most this long, and not already prefixed, get the country
    /// prefix.
    #[serde(default = "default_local_number_max_len")]
    pub local_number_max_len: usize,
}

fn default_country_prefix() -> String {
    "55".to_string()
}

fn default_local_number_max_len() -> usize {
    11
}

impl Default for DialingConfig {
    fn default() -> Self {
        Self {
            country_prefix: default_country_prefix(),
            local_number_max_len: default_local_number_max_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposerConfig {
    #[serde(default)]
    pub phrase_matrix_path: Option<String>,
    #[serde(default = "default_fallback_template")]
    pub fallback_template: String,
    #[serde(default = "default_customer_name")]
    pub default_customer_name: String,
}

fn default_fallback_template() -> String {
    DEFAULT_FALLBACK_TEMPLATE.to_string()
}

fn default_customer_name() -> String {
    "Customer".to_string()
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            phrase_matrix_path: None,
            fallback_template: default_fallback_template(),
            default_customer_name: default_customer_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_surface_url")]
    pub surface_url: String,
    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,
    /// Show the browser window. Needed once to scan the login QR code.
    #[serde(default)]
    pub presentation_mode: bool,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_navigation_timeout_seconds")]
    pub navigation_timeout_seconds: u64,
    #[serde(default = "default_marker_timeout_seconds")]
    pub marker_timeout_seconds: u64,
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,
    #[serde(default = "default_control_wait_seconds")]
    pub control_wait_seconds: u64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    #[serde(default = "default_startup_window_seconds")]
    pub startup_window_seconds: u64,
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    #[serde(default = "default_send_control_selector")]
    pub send_control_selector: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: Option<String>,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default)]
    pub chrome_executable: Option<String>,
}

fn default_surface_url() -> String {
    "https://web.whatsapp.com".to_string()
}

fn default_profile_dir() -> String {
    "~/.courier/profile".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    120
}

fn default_navigation_timeout_seconds() -> u64 {
    60
}

fn default_marker_timeout_seconds() -> u64 {
    40
}

fn default_settle_seconds() -> u64 {
    2
}

fn default_control_wait_seconds() -> u64 {
    3
}

fn default_cooldown_seconds() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_seconds() -> u64 {
    5
}

fn default_startup_window_seconds() -> u64 {
    30
}

fn default_ready_marker() -> String {
    "footer".to_string()
}

fn default_send_control_selector() -> String {
    "span[data-icon='send'], [data-testid='compose-btn-send']".to_string()
}

fn default_user_agent() -> Option<String> {
    Some(DEFAULT_USER_AGENT.to_string())
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            surface_url: default_surface_url(),
            profile_dir: default_profile_dir(),
            presentation_mode: false,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            navigation_timeout_seconds: default_navigation_timeout_seconds(),
            marker_timeout_seconds: default_marker_timeout_seconds(),
            settle_seconds: default_settle_seconds(),
            control_wait_seconds: default_control_wait_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
            max_retries: default_max_retries(),
            backoff_seconds: default_backoff_seconds(),
            startup_window_seconds: default_startup_window_seconds(),
            ready_marker: default_ready_marker(),
            send_control_selector: default_send_control_selector(),
            user_agent: default_user_agent(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            chrome_executable: None,
        }
    }
}

impl CourierConfig {
    /// Loads, applies environment overrides and validates.
    ///
    /// An explicit path must exist. Without one, a missing default file means
    /// built-in defaults.
    pub async fn load_with_path(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>)> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (default_config_path()?, false),
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file; using defaults");
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg.validate()?;
                return Ok((cfg, None));
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, Some(path)))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("COURIER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("COURIER_PROFILE_DIR") {
            self.engine.profile_dir = v;
        }
        if let Some(v) = get("COURIER_PRESENTATION_MODE") {
            self.engine.presentation_mode =
                matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("COURIER_PHRASE_MATRIX") {
            self.composer.phrase_matrix_path = Some(v);
        }
        if let Some(v) = get("COURIER_COUNTRY_PREFIX") {
            self.dialing.country_prefix = v;
        }
        if let Some(v) = get("COURIER_CHROME_EXECUTABLE") {
            self.engine.chrome_executable = Some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        let prefix = &self.dialing.country_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow::anyhow!(
                "dialing.country_prefix must be digits only, got {prefix:?}"
            ));
        }
        if self.composer.fallback_template.trim().is_empty() {
            return Err(anyhow::anyhow!("composer.fallback_template must not be empty"));
        }
        let engine = &self.engine;
        if !engine.surface_url.starts_with("http://") && !engine.surface_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "engine.surface_url must be an http(s) URL, got {:?}",
                engine.surface_url
            ));
        }
        if engine.profile_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("engine.profile_dir is required"));
        }
        for (name, value) in [
            ("engine.connect_timeout_seconds", engine.connect_timeout_seconds),
            ("engine.navigation_timeout_seconds", engine.navigation_timeout_seconds),
            ("engine.marker_timeout_seconds", engine.marker_timeout_seconds),
            ("engine.startup_window_seconds", engine.startup_window_seconds),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{name} must be > 0"));
            }
        }
        if engine.max_retries == 0 {
            return Err(anyhow::anyhow!("engine.max_retries must be > 0"));
        }
        if engine.ready_marker.trim().is_empty() {
            return Err(anyhow::anyhow!("engine.ready_marker is required"));
        }
        if engine.send_control_selector.trim().is_empty() {
            return Err(anyhow::anyhow!("engine.send_control_selector is required"));
        }
        if engine.viewport_width == 0 || engine.viewport_height == 0 {
            return Err(anyhow::anyhow!("engine viewport must be non-zero"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    pub fn dial_plan(&self) -> DialPlan {
        DialPlan::new(
            self.dialing.country_prefix.clone(),
            self.dialing.local_number_max_len,
        )
    }

    pub fn phrase_matrix_path(&self) -> Result<Option<PathBuf>> {
        self.composer
            .phrase_matrix_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
            .transpose()
    }

    pub fn launch_options(&self) -> Result<LaunchOptions> {
        let engine = &self.engine;
        Ok(LaunchOptions {
            surface_url: engine.surface_url.clone(),
            profile_dir: expand_home(&engine.profile_dir)?,
            presentation_mode: engine.presentation_mode,
            user_agent: engine.user_agent.clone().filter(|ua| !ua.trim().is_empty()),
            viewport: (engine.viewport_width, engine.viewport_height),
            executable: engine
                .chrome_executable
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(expand_home)
                .transpose()?,
        })
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let engine = &self.engine;
        Ok(EngineSettings {
            launch: self.launch_options()?,
            connect_timeout: Duration::from_secs(engine.connect_timeout_seconds),
            max_retries: engine.max_retries,
            backoff: Duration::from_secs(engine.backoff_seconds),
            startup_window: Duration::from_secs(engine.startup_window_seconds),
        })
    }

    pub fn send_protocol(&self) -> SendProtocol {
        let engine = &self.engine;
        let timings = ProtocolTimings {
            navigation_timeout: Duration::from_secs(engine.navigation_timeout_seconds),
            marker_timeout: Duration::from_secs(engine.marker_timeout_seconds),
            settle: Duration::from_secs(engine.settle_seconds),
            control_wait: Duration::from_secs(engine.control_wait_seconds),
            cooldown: Duration::from_secs(engine.cooldown_seconds),
            ..ProtocolTimings::default()
        };
        SendProtocol::new(
            engine.surface_url.clone(),
            engine.ready_marker.clone(),
            engine.send_control_selector.clone(),
            timings,
        )
    }
}

pub fn default_root_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".courier"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_root_dir()?.join("config.toml"))
}

pub fn expand_home(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen('~', &home, 1)))
}
