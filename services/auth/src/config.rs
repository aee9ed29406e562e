//! Service configuration loaded from the environment

use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::jwt::JwtConfig;
use crate::models::RoleName;
use crate::password::HasherConfig;
use crate::reset::RESET_TOKEN_TTL_MINUTES;
use crate::validation::MIN_PASSWORD_LENGTH;

/// Where users, grants and reset tokens live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// PostgreSQL for records, Redis for refresh sessions
    Postgres,
    /// Process memory; state is lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown STORAGE_BACKEND: {}", other),
        }
    }
}

/// MAX Mini-App settings
#[derive(Clone)]
pub struct MaxConfig {
    pub bot_token: String,
    /// Role given to accounts the Mini-App provisions
    pub default_role: RoleName,
}

impl fmt::Debug for MaxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxConfig")
            .field("bot_token", &"<redacted>")
            .field("default_role", &self.default_role)
            .finish()
    }
}

impl MaxConfig {
    /// # Environment Variables
    /// - `MAX_BOT_TOKEN`: bot secret used to verify init-data (empty disables MAX sign-in)
    /// - `MAX_DEFAULT_ROLE`: role of newly provisioned accounts (default: operator)
    pub fn from_env() -> Result<Self> {
        let default_role = match std::env::var("MAX_DEFAULT_ROLE") {
            Ok(value) => value.parse::<RoleName>().map_err(anyhow::Error::msg)?,
            Err(_) => RoleName::Operator,
        };

        Ok(Self {
            bot_token: std::env::var("MAX_BOT_TOKEN").unwrap_or_default(),
            default_role,
        })
    }
}

/// How notifications reach users
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationMode {
    /// Log that a message would be sent
    Log,
    /// POST to the messaging peer
    Http { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub mode: NotificationMode,
    /// Per-request timeout; retries stop after three times this
    pub timeout: Duration,
}

impl NotificationConfig {
    /// # Environment Variables
    /// - `NOTIFICATION_SERVICE_TYPE`: `mock` or `http` (default: mock)
    /// - `NOTIFICATION_SERVICE_URL`: peer base URL (required for http)
    /// - `NOTIFICATION_TIMEOUT_SECS`: request timeout (default: 10)
    pub fn from_env() -> Result<Self> {
        let kind = std::env::var("NOTIFICATION_SERVICE_TYPE").unwrap_or_else(|_| "mock".into());
        let mode = match kind.trim().to_ascii_lowercase().as_str() {
            "mock" | "log" => NotificationMode::Log,
            "http" | "max" => NotificationMode::Http {
                url: std::env::var("NOTIFICATION_SERVICE_URL")
                    .context("NOTIFICATION_SERVICE_URL must be set for http notifications")?,
            },
            other => anyhow::bail!("Unknown NOTIFICATION_SERVICE_TYPE: {}", other),
        };

        let timeout = std::env::var("NOTIFICATION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            mode,
            timeout: Duration::from_secs(timeout),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub reset_token_ttl_minutes: i64,
}

impl PasswordConfig {
    /// # Environment Variables
    /// - `MIN_PASSWORD_LENGTH`: may raise but never lower the minimum of 12
    /// - `RESET_TOKEN_TTL_MINUTES`: reset token lifetime (default: 15)
    pub fn from_env() -> Result<Self> {
        let min_length = std::env::var("MIN_PASSWORD_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MIN_PASSWORD_LENGTH);
        if min_length < MIN_PASSWORD_LENGTH {
            anyhow::bail!(
                "MIN_PASSWORD_LENGTH must be at least {}",
                MIN_PASSWORD_LENGTH
            );
        }

        let reset_token_ttl_minutes = std::env::var("RESET_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(RESET_TOKEN_TTL_MINUTES);
        if reset_token_ttl_minutes <= 0 {
            anyhow::bail!("RESET_TOKEN_TTL_MINUTES must be positive");
        }

        Ok(Self {
            min_length,
            reset_token_ttl_minutes,
        })
    }
}

/// Everything the service needs besides the storage connection settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Listener for user and role administration
    pub internal_bind_addr: String,
    pub storage: StorageBackend,
    pub run_migrations: bool,
    pub jwt: JwtConfig,
    pub hasher: HasherConfig,
    pub max: MaxConfig,
    pub notification: NotificationConfig,
    pub password: PasswordConfig,
}

impl AppConfig {
    /// # Environment Variables
    /// - `BIND_ADDR`: public listen address (default: 0.0.0.0:3000)
    /// - `INTERNAL_BIND_ADDR`: administration listen address (default: 127.0.0.1:3001)
    /// - `STORAGE_BACKEND`: `postgres` or `memory` (default: postgres)
    /// - `RUN_MIGRATIONS`: apply migrations at startup (default: false)
    ///
    /// plus the variables read by the nested configs.
    pub fn from_env() -> Result<Self> {
        let storage = std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .parse()?;

        let run_migrations = std::env::var("RUN_MIGRATIONS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
        let internal_bind_addr =
            std::env::var("INTERNAL_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".into());
        if internal_bind_addr == bind_addr {
            anyhow::bail!("INTERNAL_BIND_ADDR must differ from BIND_ADDR");
        }

        Ok(Self {
            bind_addr,
            internal_bind_addr,
            storage,
            run_migrations,
            jwt: JwtConfig::from_env()?,
            hasher: HasherConfig::from_env(),
            max: MaxConfig::from_env()?,
            notification: NotificationConfig::from_env()?,
            password: PasswordConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ACCESS_SECRET",
        "REFRESH_SECRET",
        "ACCESS_TOKEN_TTL",
        "REFRESH_TOKEN_TTL",
        "BIND_ADDR",
        "INTERNAL_BIND_ADDR",
        "STORAGE_BACKEND",
        "RUN_MIGRATIONS",
        "MAX_BOT_TOKEN",
        "MAX_DEFAULT_ROLE",
        "NOTIFICATION_SERVICE_TYPE",
        "NOTIFICATION_SERVICE_URL",
        "NOTIFICATION_TIMEOUT_SECS",
        "MIN_PASSWORD_LENGTH",
        "RESET_TOKEN_TTL_MINUTES",
        "HASH_MEMORY_KIB",
    ];

    fn clear() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    fn set_secrets() {
        unsafe {
            std::env::set_var("ACCESS_SECRET", "access");
            std::env::set_var("REFRESH_SECRET", "refresh");
        }
    }

    #[test]
    #[serial]
    fn defaults() {
        clear();
        set_secrets();

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.internal_bind_addr, "127.0.0.1:3001");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert!(!config.run_migrations);
        assert_eq!(config.max.default_role, RoleName::Operator);
        assert!(config.max.bot_token.is_empty());
        assert_eq!(config.notification.mode, NotificationMode::Log);
        assert_eq!(config.notification.timeout, Duration::from_secs(10));
        assert_eq!(config.password.min_length, 12);
        assert_eq!(config.password.reset_token_ttl_minutes, 15);
        assert_eq!(config.hasher, HasherConfig::default());

        clear();
    }

    #[test]
    #[serial]
    fn overrides() {
        clear();
        set_secrets();
        unsafe {
            std::env::set_var("STORAGE_BACKEND", "memory");
            std::env::set_var("RUN_MIGRATIONS", "true");
            std::env::set_var("MAX_BOT_TOKEN", "bot-secret");
            std::env::set_var("MAX_DEFAULT_ROLE", "curator");
            std::env::set_var("NOTIFICATION_SERVICE_TYPE", "http");
            std::env::set_var("NOTIFICATION_SERVICE_URL", "http://maxbot:8080");
            std::env::set_var("MIN_PASSWORD_LENGTH", "16");
            std::env::set_var("HASH_MEMORY_KIB", "65536");
            std::env::set_var("INTERNAL_BIND_ADDR", "10.0.0.5:9001");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.internal_bind_addr, "10.0.0.5:9001");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.run_migrations);
        assert_eq!(config.max.default_role, RoleName::Curator);
        assert_eq!(
            config.notification.mode,
            NotificationMode::Http {
                url: "http://maxbot:8080".into()
            }
        );
        assert_eq!(config.password.min_length, 16);
        assert_eq!(config.hasher.memory_kib, 65536);
        assert!(!format!("{:?}", config).contains("bot-secret"));

        clear();
    }

    #[test]
    #[serial]
    fn rejects_invalid_values() {
        clear();
        set_secrets();

        unsafe {
            std::env::set_var("MIN_PASSWORD_LENGTH", "8");
        }
        assert!(AppConfig::from_env().is_err());

        unsafe {
            std::env::remove_var("MIN_PASSWORD_LENGTH");
            std::env::set_var("MAX_DEFAULT_ROLE", "janitor");
        }
        assert!(AppConfig::from_env().is_err());

        unsafe {
            std::env::remove_var("MAX_DEFAULT_ROLE");
            std::env::set_var("NOTIFICATION_SERVICE_TYPE", "http");
        }
        assert!(AppConfig::from_env().is_err());

        unsafe {
            std::env::remove_var("NOTIFICATION_SERVICE_TYPE");
            std::env::set_var("STORAGE_BACKEND", "sqlite");
        }
        assert!(AppConfig::from_env().is_err());

        unsafe {
            std::env::remove_var("STORAGE_BACKEND");
            std::env::set_var("BIND_ADDR", "0.0.0.0:4000");
            std::env::set_var("INTERNAL_BIND_ADDR", "0.0.0.0:4000");
        }
        assert!(AppConfig::from_env().is_err());

        clear();
    }
}
