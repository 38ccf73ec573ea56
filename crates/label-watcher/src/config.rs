//! Watcher configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! - `GITHUB_TOKEN`: API token (required to poll)
//! - `GITHUB_API_URL`: API root, defaults to `https://api.github.com`
//! - `LABEL_WATCHER_POLL_INTERVAL_SECS`: poll interval override
//! - `LABEL_WATCHER_REPOSITORY`: extra `owner/repo` to watch

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::watcher::WatcherSettings;
use crate::workflow::WorkflowLabels;

const ENV_TOKEN: &str = "GITHUB_TOKEN";
const ENV_API_URL: &str = "GITHUB_API_URL";
const ENV_POLL_INTERVAL: &str = "LABEL_WATCHER_POLL_INTERVAL_SECS";
const ENV_REPOSITORY: &str = "LABEL_WATCHER_REPOSITORY";

/// Repository to watch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryConfig {
    pub owner: String,
    pub repo: String,
}

impl RepositoryConfig {
    /// Parse `owner/repo`
    pub fn parse(slug: &str) -> Result<Self, ConfigError> {
        match slug.trim().split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(ConfigError::Invalid(format!(
                "repository '{slug}' must be in owner/repo form"
            ))),
        }
    }

    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
    pub state_retention_secs: u64,
    pub summary_every_cycles: u64,
    pub api_url: String,
    pub repositories: Vec<RepositoryConfig>,
    pub workflow: WorkflowLabels,
    /// Never read from the file; only from `GITHUB_TOKEN`
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            state_retention_secs: 24 * 60 * 60,
            summary_every_cycles: 10,
            api_url: "https://api.github.com".to_string(),
            repositories: vec![],
            workflow: WorkflowLabels::default(),
            token: None,
        }
    }
}

impl WatcherConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from an optional file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                debug!(path = %path.display(), "Loaded config file");
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.token = std::env::var(ENV_TOKEN)
            .ok()
            .filter(|token| !token.trim().is_empty());

        if let Ok(api_url) = std::env::var(ENV_API_URL) {
            if !api_url.trim().is_empty() {
                self.api_url = api_url;
            }
        }

        if let Ok(interval) = std::env::var(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = interval.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_POLL_INTERVAL}='{interval}' is not a number"))
            })?;
        }

        if let Ok(slug) = std::env::var(ENV_REPOSITORY) {
            let repository = RepositoryConfig::parse(&slug)?;
            if self.repositories.contains(&repository) {
                debug!(repository = %slug, "Repository from environment already configured");
            } else {
                self.repositories.push(repository);
            }
        }

        Ok(())
    }

    /// Check settings that would make the watcher misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.repositories.is_empty() {
            warn!("No repositories configured");
        }
        for repository in &self.repositories {
            if repository.owner.trim().is_empty() || repository.repo.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "repository '{}' has an empty owner or name",
                    repository.slug()
                )));
            }
        }

        let labels = self.workflow.all_labels();
        let mut seen = HashSet::new();
        for label in labels {
            if label.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "workflow labels must not be empty".to_string(),
                ));
            }
            if !seen.insert(label) {
                return Err(ConfigError::Invalid(format!(
                    "workflow label '{label}' is used more than once"
                )));
            }
        }

        Ok(())
    }

    /// Token, or an error when none was provided
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::Missing(ENV_TOKEN))
    }

    #[must_use]
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            state_retention: Duration::from_secs(self.state_retention_secs),
            summary_every_cycles: self.summary_every_cycles,
        }
    }
}
