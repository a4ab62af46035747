//! Configuration file handling.

use anyhow::{Context, Result, bail};
use bilichat::SessionConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "bilichat";

const TEMPLATE: &str = r#"# bilichat configuration

# Cookie header copied from a logged-in browser session
# (needs at least SESSDATA, bili_jct and DedeUserID)
cookie = ""

# Live room id (short ids are accepted)
room_id = 0

# log_dir = "/path/to/logs"
# dump_dir = "/path/to/frames"
# heartbeat_interval_secs = 30
# poll_interval_secs = 30

[history]
danmaku = 1024
sc = 512
gift = 512
"#;

/// Sizes of the in-memory message buffers kept by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub danmaku: usize,
    pub sc: usize,
    pub gift: usize,
}

impl HistoryConfig {
    /// Zero means "use the default".
    pub fn normalized(self) -> Self {
        fn or(value: usize, default: usize) -> usize {
            if value == 0 { default } else { value }
        }
        Self {
            danmaku: or(self.danmaku, 1024),
            sc: or(self.sc, 512),
            gift: or(self.gift, 512),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cookie: String,
    pub room_id: u64,
    pub log_dir: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
    pub heartbeat_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub history: HistoryConfig,
}

/// Result of loading the config file.
#[derive(Debug)]
pub enum Loaded {
    Config(AppConfig),
    /// The file did not exist; a template was written there.
    Created(PathBuf),
}

impl AppConfig {
    /// `<config dir>/bilichat/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(base.join(APP_NAME).join("config.toml"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(content).context("Invalid config file")?;
        config.history = config.history.normalized();
        Ok(config)
    }

    /// Load `path`, or write the template there if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Loaded> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, TEMPLATE)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            return Ok(Loaded::Created(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Loaded::Config(Self::parse(&content)?))
    }

    /// Command-line values take precedence over the file.
    pub fn merge_args(mut self, room_id: Option<u64>, cookie: Option<String>) -> Self {
        if let Some(room_id) = room_id {
            self.room_id = room_id;
        }
        if let Some(cookie) = cookie {
            self.cookie = cookie;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cookie.trim().is_empty() {
            bail!("No cookie configured; set `cookie` in the config file or pass --cookie");
        }
        if self.room_id == 0 {
            bail!("No room id configured; set `room_id` in the config file or pass --id");
        }
        Ok(())
    }

    /// Log directory, defaulting to `logs/` next to the config file.
    pub fn log_dir(&self, config_path: &Path) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            config_path
                .parent()
                .map(|p| p.join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            dump_dir: self.dump_dir.clone(),
            ..SessionConfig::default()
        };
        if self.heartbeat_interval_secs > 0 {
            config.heartbeat_interval = Duration::from_secs(self.heartbeat_interval_secs);
        }
        if self.poll_interval_secs > 0 {
            config.poll_interval = Duration::from_secs(self.poll_interval_secs);
        }
        config
    }
}
