//! # Application Configuration
//!
//! [`AppConfig::from_env`] reads the process environment; [`AppConfig::from_lookup`]
//! takes any key lookup so tests never touch global state. Unset keys use the
//! defaults below. Values that fail to parse also fall back to the default, with a
//! warning.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `APP_NAME` | `resource-sample` |
//! | `ENV` | `development` |
//! | `LOG_LEVEL` | `debug` in development, `info` otherwise |
//! | `LOG_FORMAT` | `compact` in development, `json` in production |
//! | `DATABASE_URL` | `memory://localhost` |
//! | `DATABASE_NAME` | `app` |
//! | `DATABASE_PING_TIMEOUT_MS` | `5000` |
//! | `CACHE_URL` | `memory://localhost` |
//! | `CACHE_DEFAULT_TTL_MS` | `300000` |
//! | `CACHE_PING_TIMEOUT_MS` | `5000` |
//! | `SHUTDOWN_TIMEOUT_MS` | `5000` |
//! | `REPOSITORY_BACKEND` | `document` |
//! | `ID_POLICY` | `lenient` |
//! | `WAIT_FOR_SIGNAL` | `false`; when `true` the binary stays up until SIGINT/SIGTERM |

use resource_framework::tracing::{LogConfig, LogFormat};
use resource_framework::IdPolicy;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

/// Which [`UserRepository`](crate::user_repository::UserRepository) implementation to wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepositoryBackend {
    /// Backed by the `users` collection of the document database.
    #[default]
    Document,
    /// Process-local map; nothing survives a restart.
    Memory,
}

impl FromStr for RepositoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "database" => Ok(RepositoryBackend::Document),
            "memory" | "mock" => Ok(RepositoryBackend::Memory),
            other => Err(format!("unknown repository backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub name: String,
    pub ping_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory://localhost".to_string(),
            name: "app".to_string(),
            ping_timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub url: String,
    pub default_ttl: Duration,
    pub ping_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "memory://localhost".to_string(),
            default_ttl: Duration::from_secs(300),
            ping_timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub env: Environment,
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub shutdown_timeout: Duration,
    pub repository: RepositoryBackend,
    pub id_policy: IdPolicy,
    /// Keep running after the demo scenario until the process is told to stop.
    pub wait_for_signal: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let env = Environment::default();
        Self {
            app_name: "resource-sample".to_string(),
            env,
            log: default_log(env),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            shutdown_timeout: DEFAULT_TIMEOUT,
            repository: RepositoryBackend::default(),
            id_policy: IdPolicy::default(),
            wait_for_signal: false,
        }
    }
}

fn default_log(env: Environment) -> LogConfig {
    match env {
        Environment::Development => LogConfig {
            level: "debug".to_string(),
            format: LogFormat::Compact,
        },
        Environment::Test => LogConfig {
            level: "info".to_string(),
            format: LogFormat::Compact,
        },
        Environment::Production => LogConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        },
    }
}

/// Typed view over a key lookup, falling back to defaults on absent or bad values.
struct Source<F> {
    lookup: F,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: String) -> String {
        (self.lookup)(key)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        match (self.lookup)(key).filter(|v| !v.is_empty()) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(e) => {
                    warn!(key, value = %raw, error = %e, "Invalid configuration value, using default");
                    default
                }
            },
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parsed(key, default.as_millis() as u64))
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source { lookup };
        let defaults = AppConfig::default();

        let env = src.parsed("ENV", defaults.env);
        let log_defaults = default_log(env);
        let log = LogConfig {
            level: src.string("LOG_LEVEL", log_defaults.level),
            format: src.parsed("LOG_FORMAT", log_defaults.format),
        };

        Self {
            app_name: src.string("APP_NAME", defaults.app_name),
            env,
            log,
            database: DatabaseConfig {
                url: src.string("DATABASE_URL", defaults.database.url),
                name: src.string("DATABASE_NAME", defaults.database.name),
                ping_timeout: src.millis("DATABASE_PING_TIMEOUT_MS", defaults.database.ping_timeout),
            },
            cache: CacheConfig {
                url: src.string("CACHE_URL", defaults.cache.url),
                default_ttl: src.millis("CACHE_DEFAULT_TTL_MS", defaults.cache.default_ttl),
                ping_timeout: src.millis("CACHE_PING_TIMEOUT_MS", defaults.cache.ping_timeout),
            },
            shutdown_timeout: src.millis("SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
            repository: src.parsed("REPOSITORY_BACKEND", defaults.repository),
            id_policy: src.parsed("ID_POLICY", defaults.id_policy),
            wait_for_signal: src.parsed("WAIT_FOR_SIGNAL", defaults.wait_for_signal),
        }
    }

    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]);
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn production_switches_log_defaults() {
        let config = config_from(&[("ENV", "production")]);
        assert!(config.is_production());
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");

        let overridden = config_from(&[("ENV", "prod"), ("LOG_LEVEL", "warn"), ("LOG_FORMAT", "pretty")]);
        assert_eq!(overridden.log.level, "warn");
        assert_eq!(overridden.log.format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("SHUTDOWN_TIMEOUT_MS", "soon"),
            ("CACHE_DEFAULT_TTL_MS", "1500"),
            ("REPOSITORY_BACKEND", "memory"),
            ("ID_POLICY", "paranoid"),
        ]);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.default_ttl, Duration::from_millis(1500));
        assert_eq!(config.repository, RepositoryBackend::Memory);
        assert_eq!(config.id_policy, IdPolicy::Lenient);
    }

    #[test]
    fn wait_for_signal_is_opt_in() {
        assert!(!config_from(&[]).wait_for_signal);
        assert!(config_from(&[("WAIT_FOR_SIGNAL", "true")]).wait_for_signal);
        assert!(!config_from(&[("WAIT_FOR_SIGNAL", "yes please")]).wait_for_signal);
    }
}
