use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{course::tree::DEFAULT_LESSONS_PER_MODULE, enrollment::RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub tree: TreeConfig,
    pub sessions: SessionsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token handed to the HTTP backend, never read by the engine itself
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Block size for lessons that carry no module id
    pub lessons_per_module: i64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            lessons_per_module: DEFAULT_LESSONS_PER_MODULE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub capacity: u64,
    pub idle_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            idle_minutes: 30,
        }
    }
}

impl Config {
    /// Load from a toml file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut config = toml::from_str::<Config>(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        let _ = dotenvy::dotenv();
        if let Ok(base_url) = dotenvy::var("COURSE_API_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Ok(token) = dotenvy::var("COURSE_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Ok(timeout) = dotenvy::var("COURSE_REQUEST_TIMEOUT_MS") {
            self.api.request_timeout_ms = timeout
                .parse()
                .with_context(|| format!("invalid COURSE_REQUEST_TIMEOUT_MS: {timeout}"))?;
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.api.request_timeout_ms > 0, "request timeout must be positive");
        anyhow::ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be at least 1");
        anyhow::ensure!(
            self.tree.lessons_per_module > 0,
            "tree.lessons_per_module must be positive"
        );
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.retry.interval_ms),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_minutes * 60)
    }
}
