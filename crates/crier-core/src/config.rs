//! TOML configuration loading and validation.
//!
//! Required keys are promoted to typed [`ConfigError`] values so that a
//! misconfigured process fails once at initialization instead of limping
//! along and failing per request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config key '{key}' is missing or empty")]
    MissingKey { key: &'static str },
}

/// Tracker (Conduit-style) API endpoint plus the per-webhook shared secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// API base, conventionally ending in `/api/`.
    pub host: String,
    pub token: String,
    /// Webhook endpoint name -> shared HMAC secret.
    #[serde(default)]
    pub hooks: BTreeMap<String, String>,
}

impl TrackerConfig {
    /// The user-facing site root, with the trailing `api/` segment removed.
    pub fn web_base(&self) -> String {
        self.host.trim_end_matches("api/").to_string()
    }

    pub fn hook_secret(&self, endpoint: &str) -> Option<&str> {
        self.hooks.get(endpoint).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    pub password: String,
    pub channel: String,
    /// Delay before (re)sending JOIN after identification, in milliseconds.
    #[serde(default = "default_join_delay_ms")]
    pub join_delay_ms: u64,
    /// Pacing delay between consecutive outbound notices, in milliseconds.
    #[serde(default = "default_send_pacing_ms")]
    pub send_pacing_ms: u64,
    /// Pause between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_pause_ms")]
    pub reconnect_pause_ms: u64,
}

fn default_join_delay_ms() -> u64 {
    5_000
}

fn default_send_pacing_ms() -> u64 {
    200
}

fn default_reconnect_pause_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsConfig {
    /// Jenkins site root, e.g. `https://ci.example.org`.
    pub site: String,
    /// Repository URL template; the literal `PACKAGE` token is replaced with
    /// the mapped package name when triggering a build.
    pub trigger_template: String,
    /// Subject label used for build-status chat notices.
    #[serde(default = "default_status_label")]
    pub status_label: String,
    /// Settle delay before polling a freshly triggered build, milliseconds.
    #[serde(default = "default_status_settle_ms")]
    pub status_settle_ms: u64,
}

fn default_status_label() -> String {
    "CI".to_string()
}

fn default_status_settle_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchpadConfig {
    /// REST API base, e.g. `https://api.launchpad.net/1.0`.
    pub base_url: String,
    pub token: String,
    /// Release targets bug updates are allowed for.
    #[serde(default)]
    pub supported_releases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub irc: IrcConfig,
    pub jenkins: Option<JenkinsConfig>,
    pub launchpad: Option<LaunchpadConfig>,
    /// Repository name -> package name for build triggering.
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        required(&self.tracker.host, "tracker.host")?;
        required(&self.tracker.token, "tracker.token")?;
        required(&self.irc.host, "irc.host")?;
        required(&self.irc.nickname, "irc.nickname")?;
        required(&self.irc.password, "irc.password")?;
        required(&self.irc.channel, "irc.channel")?;
        for (endpoint, secret) in &self.tracker.hooks {
            if secret.trim().is_empty() {
                let key: &'static str = match endpoint.as_str() {
                    "irc" => "tracker.hooks.irc",
                    "commithook" => "tracker.hooks.commithook",
                    "jenkins" => "tracker.hooks.jenkins",
                    "jenkinsnag" => "tracker.hooks.jenkinsnag",
                    _ => "tracker.hooks",
                };
                return Err(ConfigError::MissingKey { key });
            }
        }
        if let Some(jenkins) = &self.jenkins {
            required(&jenkins.site, "jenkins.site")?;
            required(&jenkins.trigger_template, "jenkins.trigger_template")?;
        }
        if let Some(launchpad) = &self.launchpad {
            required(&launchpad.base_url, "launchpad.base_url")?;
            required(&launchpad.token, "launchpad.token")?;
        }
        Ok(())
    }
}

fn required(value: &str, key: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingKey { key });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const BASELINE: &str = r##"
[tracker]
host = "https://tracker.example.org/api/"
token = "api-abc123"

[tracker.hooks]
irc = "hunter2"
commithook = "hunter3"

[irc]
host = "irc.example.net"
port = 6697
nickname = "crier"
password = "sekrit"
channel = "#dev"

[jenkins]
site = "https://ci.example.org"
trigger_template = "https://git.example.org/PACKAGE.git"

[launchpad]
base_url = "https://api.launchpad.example/1.0"
token = "lp-token"
supported_releases = ["nimble", "orderly"]

[packages]
calamares-settings = "calamares-settings-example"
"##;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn unit_load_baseline_config() {
        let file = write_config(BASELINE);
        let config = Config::load(file.path()).expect("config should load");
        assert_eq!(config.tracker.host, "https://tracker.example.org/api/");
        assert_eq!(config.tracker.hook_secret("irc"), Some("hunter2"));
        assert_eq!(config.irc.port, 6697);
        assert_eq!(config.irc.join_delay_ms, 5_000);
        assert_eq!(config.irc.send_pacing_ms, 200);
        assert_eq!(
            config.packages.get("calamares-settings").map(String::as_str),
            Some("calamares-settings-example")
        );
        let launchpad = config.launchpad.expect("launchpad section");
        assert_eq!(launchpad.supported_releases.len(), 2);
    }

    #[test]
    fn unit_web_base_strips_api_suffix() {
        let file = write_config(BASELINE);
        let config = Config::load(file.path()).expect("config should load");
        assert_eq!(config.tracker.web_base(), "https://tracker.example.org/");
    }

    #[test]
    fn unit_missing_token_is_fatal() {
        let contents = BASELINE.replace("token = \"api-abc123\"", "token = \"\"");
        let file = write_config(&contents);
        let error = Config::load(file.path()).expect_err("empty token should fail");
        assert!(matches!(
            error,
            ConfigError::MissingKey {
                key: "tracker.token"
            }
        ));
    }

    #[test]
    fn unit_empty_hook_secret_is_fatal() {
        let contents = BASELINE.replace("irc = \"hunter2\"", "irc = \"\"");
        let file = write_config(&contents);
        let error = Config::load(file.path()).expect_err("empty secret should fail");
        assert!(matches!(
            error,
            ConfigError::MissingKey {
                key: "tracker.hooks.irc"
            }
        ));
    }

    #[test]
    fn regression_unparseable_config_reports_path() {
        let file = write_config("[tracker\nhost = nope");
        let error = Config::load(file.path()).expect_err("bad toml should fail");
        assert!(error.to_string().contains("failed to parse config file"));
    }
}
