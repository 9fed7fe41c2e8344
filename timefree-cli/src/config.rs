use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timefree_engine::TimefreeConfig;

use crate::cli::{Args, ConcatArg};
use crate::error::{AppError, Result};

const APP_DIR: &str = "timefree";
const CONFIG_FILE: &str = "config.toml";

/// User configuration file. Every field is optional; absent values keep the
/// engine defaults and command-line flags override both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Directory for assembled programs
    pub output_dir: Option<PathBuf>,
    pub http: HttpSection,
    pub accelerator: AcceleratorSection,
    pub retry: RetrySection,
    pub assemble: AssembleSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcceleratorSection {
    pub enabled: Option<bool>,
    pub download_rate: Option<usize>,
    pub checkpoint_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssembleSection {
    pub concat: Option<ConcatArg>,
    pub ffmpeg_path: Option<PathBuf>,
    pub keep_segments: Option<bool>,
}

impl AppConfig {
    /// Load configuration from `config_path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let (path, required) = match config_path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(AppError::Config(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Engine configuration: defaults, then this file, then command-line flags.
    pub fn engine_config(&self, args: &Args) -> TimefreeConfig {
        let mut config = TimefreeConfig::default();

        if let Some(user_agent) = &self.http.user_agent {
            config.http.user_agent = user_agent.clone();
        }
        if let Some(secs) = self.http.connect_timeout_secs {
            config.http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http.timeout_secs {
            config.http.timeout = Duration::from_secs(secs);
        }

        if let Some(enabled) = self.accelerator.enabled {
            config.accelerator.enabled = enabled;
        }
        if let Some(rate) = args.download_rate.or(self.accelerator.download_rate) {
            config.accelerator.download_rate = rate;
        }
        if let Some(secs) = args
            .checkpoint_interval
            .or(self.accelerator.checkpoint_interval_secs)
        {
            config.accelerator.checkpoint_interval = Duration::from_secs(secs);
        }
        if args.no_accelerate {
            config.accelerator.enabled = false;
        }

        if let Some(retries) = self.retry.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = self.retry.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry.max_delay_ms {
            config.retry.max_delay = Duration::from_millis(ms);
        }

        if let Some(concat) = args.concat.or(self.assemble.concat) {
            config.assemble.mode = concat.into();
        }
        if let Some(path) = args.ffmpeg_path.as_ref().or(self.assemble.ffmpeg_path.as_ref()) {
            config.assemble.ffmpeg_path = path.clone();
        }
        config.assemble.keep_segments =
            args.keep_segments || self.assemble.keep_segments.unwrap_or(false);

        config
    }
}
