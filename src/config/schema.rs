use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where the config was read from; not serialized.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub timer: TimerConfig,
}

// ── Runtime ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pool size of the task tracker.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Directory scanned for `cmd_*` units at startup.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    /// `/cmd@name` addressed to another name is ignored.
    #[serde(default)]
    pub bot_username: Option<String>,
}

fn default_worker_threads() -> usize {
    4
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            modules_dir: default_modules_dir(),
            bot_username: None,
        }
    }
}

// ── Command replies ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Reply "unknown command" to known users.
    #[serde(default = "default_true")]
    pub reply_on_unknown: bool,
    /// Reply with the deny reason when authorisation fails.
    #[serde(default = "default_true")]
    pub reply_on_denied: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            reply_on_unknown: true,
            reply_on_denied: true,
        }
    }
}

// ── Authorisation ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub owner_id: Option<i64>,
    /// Users allowed to run restricted commands besides the owner.
    #[serde(default)]
    pub whitelist: Vec<i64>,
    #[serde(default)]
    pub blacklist: Vec<i64>,
    #[serde(default)]
    pub allow_bots: bool,
    /// Messages older than this are not executed.
    #[serde(default = "default_max_message_age_secs")]
    pub max_message_age_secs: u64,
}

fn default_max_message_age_secs() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            owner_id: None,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            allow_bots: false,
            max_message_age_secs: default_max_message_age_secs(),
        }
    }
}

// ── Timer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_timer_min_secs")]
    pub min_secs: u64,
    #[serde(default = "default_timer_max_secs")]
    pub max_secs: u64,
    #[serde(default = "default_timer_update_interval_secs")]
    pub update_interval_secs: u64,
}

fn default_timer_min_secs() -> u64 {
    5
}

fn default_timer_max_secs() -> u64 {
    30 * 60 * 60
}

fn default_timer_update_interval_secs() -> u64 {
    10
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_secs: default_timer_min_secs(),
            max_secs: default_timer_max_secs(),
            update_interval_secs: default_timer_update_interval_secs(),
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

impl Config {
    /// Platform config file, e.g. `~/.config/tgbot/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tgbot").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reads `path` (or the platform default when it exists), falls back to
    /// defaults otherwise, then applies env overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match resolved {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let mut config = Self::from_toml(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                config.config_path = Some(path);
                config
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TGBOT_MODULES_DIR") {
            if !dir.is_empty() {
                self.runtime.modules_dir = PathBuf::from(dir);
            }
        }

        if let Ok(threads) = std::env::var("TGBOT_WORKER_THREADS") {
            if let Ok(threads) = threads.trim().parse::<usize>() {
                self.runtime.worker_threads = threads;
            }
        }

        if let Ok(owner) = std::env::var("TGBOT_OWNER_ID") {
            if let Ok(owner) = owner.trim().parse::<i64>() {
                self.auth.owner_id = Some(owner);
            }
        }

        if let Ok(name) = std::env::var("TGBOT_BOT_USERNAME") {
            if !name.is_empty() {
                self.runtime.bot_username = Some(name);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.worker_threads == 0 {
            anyhow::bail!("runtime.worker_threads must be at least 1");
        }
        if self.timer.min_secs > self.timer.max_secs {
            anyhow::bail!(
                "timer.min_secs ({}) exceeds timer.max_secs ({})",
                self.timer.min_secs,
                self.timer.max_secs
            );
        }
        if self.timer.update_interval_secs == 0 {
            anyhow::bail!("timer.update_interval_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.runtime.worker_threads, 4);
        assert_eq!(config.timer.min_secs, 5);
        assert_eq!(config.timer.max_secs, 108_000);
        assert!(config.commands.reply_on_unknown);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [runtime]
            modules_dir = "/opt/bot/modules"

            [auth]
            owner_id = 42
            whitelist = [7, 8]
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.modules_dir, PathBuf::from("/opt/bot/modules"));
        assert_eq!(config.runtime.worker_threads, 4);
        assert_eq!(config.auth.owner_id, Some(42));
        assert_eq!(config.auth.whitelist, vec![7, 8]);
        assert_eq!(config.auth.max_message_age_secs, 60);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.runtime.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_timer_bounds() {
        let mut config = Config::default();
        config.timer.min_secs = 100;
        config.timer.max_secs = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timer.min_secs"));
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[timer]\nmin_secs = 1\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.timer.min_secs, 1);
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[runtime\nworker_threads = ").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }
}
