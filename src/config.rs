//! Environment-driven configuration.
//!
//! Values come from process environment variables (after `.env` is loaded
//! by the binary). Defaults depend on `ENVIRONMENT`:
//!
//! ```text
//! ┌─────────────┬───────────┬─────────┬─────────┬─────────────┬──────────┐
//! │ Environment │ Cache TTL │ Timeout │ Retries │ Retry delay │ Logs     │
//! ├─────────────┼───────────┼─────────┼─────────┼─────────────┼──────────┤
//! │ development │ 5 min     │ 30 s    │ 3       │ 1 s         │ pretty   │
//! │ staging     │ 30 min    │ 30 s    │ 3       │ 1 s         │ pretty   │
//! │ production  │ 1 h       │ 60 s    │ 5       │ 3 s         │ json     │
//! └─────────────┴───────────┴─────────┴─────────┴─────────────┴──────────┘
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::records::{CacheSettings, RetryPolicy};

/// Deployment environment, selecting defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{}' (expected development, staging or production)",
                other
            )),
        }
    }
}

/// Gateway bind address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream record service.
#[derive(Debug, Clone)]
pub struct RecordApiConfig {
    pub base_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry_count: u32,
    /// Initial backoff between attempts.
    pub retry_delay: Duration,
    /// Serve records from this JSON file instead of the HTTP service.
    pub fixtures_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

/// Session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are reaped.
    pub idle_threshold: Duration,
    /// How often the reaper scans.
    pub reap_interval: Duration,
    /// Conversation exchanges kept per session.
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
            history_window: 10,
        }
    }
}

/// OpenAI-compatible field extraction. Rule-based extraction is used when
/// no API key is configured.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub json_logs: bool,
    pub server: ServerConfig,
    pub records: RecordApiConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub extractor: ExtractorConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let environment: Environment = env.parse("ENVIRONMENT")?.unwrap_or_default();
        let production = environment == Environment::Production;

        let (ttl_secs, timeout_secs, retry_count, retry_delay_ms) = match environment {
            Environment::Development => (300, 30, 3, 1_000),
            Environment::Staging => (1_800, 30, 3, 1_000),
            Environment::Production => (3_600, 60, 5, 3_000),
        };

        let json_logs = match env.get("LOG_FORMAT") {
            Some(format) => format.eq_ignore_ascii_case("json"),
            None => production,
        };

        let server = ServerConfig {
            host: env.get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("SERVER_PORT")?.unwrap_or(8000),
        };

        let records = RecordApiConfig {
            base_url: env
                .get("PHARMACY_API_BASE_URL")
                .unwrap_or_else(|| "https://api.example.com".to_string()),
            timeout: nonzero(
                "PHARMACY_API_TIMEOUT_SECS",
                Duration::from_secs(env.parse("PHARMACY_API_TIMEOUT_SECS")?.unwrap_or(timeout_secs)),
            )?,
            retry_count: env.parse("PHARMACY_API_RETRY_COUNT")?.unwrap_or(retry_count),
            retry_delay: Duration::from_millis(
                env.parse("PHARMACY_API_RETRY_DELAY_MS")?
                    .unwrap_or(retry_delay_ms),
            ),
            fixtures_path: env.get("PHARMACY_FIXTURES_PATH").map(PathBuf::from),
        };

        let cache = CacheConfig {
            ttl: Duration::from_secs(env.parse("CACHE_TTL_SECS")?.unwrap_or(ttl_secs)),
        };

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            idle_threshold: env
                .parse("SESSION_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_threshold),
            reap_interval: nonzero(
                "SESSION_REAP_INTERVAL_SECS",
                env.parse("SESSION_REAP_INTERVAL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.reap_interval),
            )?,
            history_window: env
                .parse("SESSION_HISTORY_WINDOW")?
                .unwrap_or(defaults.history_window),
        };
        if session.history_window == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_HISTORY_WINDOW".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let extractor = ExtractorConfig {
            api_key: env
                .get("OPENAI_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            base_url: env
                .get("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env
                .get("LLM_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: env.parse("LLM_TEMPERATURE")?.unwrap_or(0.0),
            max_tokens: env.parse("LLM_MAX_TOKENS")?.unwrap_or(500),
            timeout: nonzero(
                "LLM_TIMEOUT_SECS",
                Duration::from_secs(env.parse("LLM_TIMEOUT_SECS")?.unwrap_or(30)),
            )?,
        };

        Ok(Self {
            environment,
            json_logs,
            server,
            records,
            cache,
            session,
            extractor,
        })
    }

    /// Cache settings derived from the cache and record service sections.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: self.cache.ttl,
            retry: RetryPolicy::new(
                self.records.retry_count,
                self.records.retry_delay,
                self.records.timeout,
            ),
        }
    }

    /// Key/value listing for display, secrets redacted.
    pub fn list(&self) -> Vec<(&'static str, String)> {
        vec![
            ("environment", self.environment.to_string()),
            ("log_format", if self.json_logs { "json" } else { "pretty" }.to_string()),
            ("server.host", self.server.host.clone()),
            ("server.port", self.server.port.to_string()),
            ("records.base_url", self.records.base_url.clone()),
            ("records.timeout_secs", self.records.timeout.as_secs().to_string()),
            ("records.retry_count", self.records.retry_count.to_string()),
            (
                "records.retry_delay_ms",
                self.records.retry_delay.as_millis().to_string(),
            ),
            (
                "records.fixtures_path",
                self.records
                    .fixtures_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
            ("cache.ttl_secs", self.cache.ttl.as_secs().to_string()),
            (
                "session.idle_timeout_secs",
                self.session.idle_threshold.as_secs().to_string(),
            ),
            (
                "session.reap_interval_secs",
                self.session.reap_interval.as_secs().to_string(),
            ),
            (
                "session.history_window",
                self.session.history_window.to_string(),
            ),
            (
                "extractor.api_key",
                if self.extractor.api_key.is_some() {
                    "********"
                } else {
                    "(none, rule-based extraction)"
                }
                .to_string(),
            ),
            ("extractor.base_url", self.extractor.base_url.clone()),
            ("extractor.model", self.extractor.model.clone()),
        ]
    }
}

fn nonzero(key: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }
}
