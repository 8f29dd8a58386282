//! Typed configuration for the review-bot binary (§6's config keys table):
//! a TOML file for the bulk of it, with `clap`'s `env` attribute layered on
//! top for the two secrets nobody should commit to a file.

pub mod error;

use std::path::Path;

use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;

pub use error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub poll_interval_secs: u64,
    /// The bot's own GitLab user id — needed to tell its own release MRs
    /// apart from anyone else's when looking for the current one (§4.7).
    pub bot_user_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub dsn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FileConfig {
    gitlab: GitlabConfig,
    vk: VkConfig,
    database: DatabaseConfig,
    jira: Option<JiraConfig>,
    start_time: Option<String>,
}

/// Loaded, secret-complete configuration the rest of `review-bot` wires
/// up against. `start_time` is parsed eagerly so a malformed date fails at
/// startup rather than silently disabling the filter (§7: fatal startup
/// errors abort the process before any worker starts).
#[derive(Debug, Clone)]
pub struct Config {
    pub gitlab: GitlabConfig,
    pub vk: VkConfig,
    pub database: DatabaseConfig,
    pub jira: Option<JiraConfig>,
    pub start_time: Option<NaiveDate>,
}

/// Secret overrides sourced from the environment, layered over whatever a
/// config file carries. Never logged; `clap`'s `env` keeps them out of
/// `--help` output by default.
#[derive(Parser, Debug)]
pub struct SecretOverrides {
    #[arg(long, env = "REVIEW_BOT_GITLAB_TOKEN")]
    pub gitlab_token: Option<String>,

    #[arg(long, env = "REVIEW_BOT_VK_TOKEN")]
    pub vk_token: Option<String>,

    #[arg(long, env = "REVIEW_BOT_CONFIG", default_value = "config.toml")]
    pub config_path: String,
}

impl Default for SecretOverrides {
    fn default() -> Self {
        Self { gitlab_token: None, vk_token: None, config_path: "config.toml".to_string() }
    }
}

impl Config {
    /// Reads and parses `path`, then applies `overrides` on top of
    /// whatever token the file itself carried (if any).
    pub fn load(path: impl AsRef<Path>, overrides: &SecretOverrides) -> Result<Self> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| Error::Read { path: path_display.clone(), source })?;
        Self::from_str(&raw, &path_display, overrides)
    }

    fn from_str(raw: &str, path_display: &str, overrides: &SecretOverrides) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw).map_err(|source| Error::Parse { path: path_display.to_string(), source: Box::new(source) })?;

        let mut gitlab = file.gitlab;
        if let Some(token) = &overrides.gitlab_token {
            gitlab.token = Some(token.clone());
        }
        gitlab.token.as_ref().ok_or(Error::MissingSecret("gitlab.token"))?;

        let mut vk = file.vk;
        if let Some(token) = &overrides.vk_token {
            vk.token = Some(token.clone());
        }
        vk.token.as_ref().ok_or(Error::MissingSecret("vk.token"))?;

        let start_time = file
            .start_time
            .as_deref()
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| Error::InvalidStartTime { value: s.to_string() }))
            .transpose()?;

        Ok(Self { gitlab, vk, database: file.database, jira: file.jira, start_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        start_time = "2024-01-01"

        [gitlab]
        base_url = "https://gitlab.example.com"
        token = "file-token"
        poll_interval_secs = 30
        bot_user_id = 999

        [vk]
        base_url = "https://vk.example.com"
        token = "vk-file-token"

        [database]
        dsn = "postgres://localhost/review_bot"

        [jira]
        base_url = "https://jira.example.com"
    "#;

    #[test]
    fn loads_from_file_without_overrides() {
        let config = Config::from_str(SAMPLE, "sample.toml", &SecretOverrides::default()).unwrap();
        assert_eq!(config.gitlab.token.as_deref(), Some("file-token"));
        assert_eq!(config.vk.token.as_deref(), Some("vk-file-token"));
        assert_eq!(config.start_time, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(config.database.dsn, "postgres://localhost/review_bot");
        assert!(config.jira.is_some());
    }

    #[test]
    fn env_override_wins_over_file_token() {
        let overrides = SecretOverrides { gitlab_token: Some("env-token".to_string()), vk_token: None };
        let config = Config::from_str(SAMPLE, "sample.toml", &overrides).unwrap();
        assert_eq!(config.gitlab.token.as_deref(), Some("env-token"));
        assert_eq!(config.vk.token.as_deref(), Some("vk-file-token"));
    }

    #[test]
    fn missing_token_without_override_is_an_error() {
        let no_token = SAMPLE.replace(r#"token = "file-token""#, "");
        let result = Config::from_str(&no_token, "sample.toml", &SecretOverrides::default());
        assert!(matches!(result, Err(Error::MissingSecret("gitlab.token"))));
    }

    #[test]
    fn bad_start_time_is_rejected() {
        let bad = SAMPLE.replace("2024-01-01", "not-a-date");
        let result = Config::from_str(bad.as_str(), "sample.toml", &SecretOverrides::default());
        assert!(matches!(result, Err(Error::InvalidStartTime { .. })));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path, &SecretOverrides::default()).unwrap();
        assert_eq!(config.gitlab.base_url, "https://gitlab.example.com");
    }
}
