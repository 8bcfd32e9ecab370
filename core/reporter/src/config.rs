use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".tabtrack/reporter.toml";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const MIN_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 2;
const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to read reporter config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse reporter config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlatformConfig {
    /// Overrides the detected platform identity (`mac`, `win`, `linux`, ...).
    #[serde(default)]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// How long a connection waits for the actor's answer.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            reply_timeout_secs: DEFAULT_REPLY_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReporterConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

impl ReporterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.ipc.read_timeout_secs.max(1))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.ipc.reply_timeout_secs.max(1))
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn default_reply_timeout_secs() -> u64 {
    DEFAULT_REPLY_TIMEOUT_SECS
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_runtime_config(path: Option<PathBuf>) -> Result<ReporterConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(ReporterConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<ReporterConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_runtime_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_runtime_config(Some(temp_dir.path().join("missing.toml")))
            .expect("load config");
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.platform.os, None);
        assert_eq!(config.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.reply_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn load_runtime_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("reporter.toml");
        fs_err::write(
            &path,
            r#"
[poll]
interval_ms = 250

[platform]
os = "mac"
"#,
        )
        .expect("write config");

        let config = load_runtime_config(Some(path)).expect("load config");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.platform.os.as_deref(), Some("mac"));
        assert_eq!(config.ipc.reply_timeout_secs, 10);
    }

    #[test]
    fn poll_interval_is_clamped() {
        let mut config = ReporterConfig::default();
        config.poll.interval_ms = 5;
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("reporter.toml");
        fs_err::write(&path, "[poll]\ninterval_ms = \"fast\"\n").expect("write config");

        assert!(matches!(
            load_runtime_config(Some(path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
