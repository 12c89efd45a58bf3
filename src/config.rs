use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broadcast: BroadcastConfig,
    pub ledger: LedgerConfig,
    pub node: NodeConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub refresh_ttl_seconds: u64,
    /// Adds `Secure` to session cookies. Only disable for plain-HTTP development.
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Coalescing window between a wakeup and draining a subscriber's buffer
    pub flush_interval_ms: u64,
    /// How long a new WebSocket may take to send its subscribe message
    pub handshake_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rollover_interval_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl_seconds: 900,           // 15 minutes
            cleanup_interval_seconds: 60,
            refresh_ttl_seconds: 30 * 86400,   // 30 days
            secure_cookies: true,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 250,
            handshake_timeout_seconds: 10,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rollover_interval_seconds: 60,
        }
    }
}

impl BroadcastConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let token_defaults = TokenConfig::default();
        let broadcast_defaults = BroadcastConfig::default();
        let ledger_defaults = LedgerConfig::default();

        let secure_cookies = std::env::var("SECURE_COOKIES")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(token_defaults.secure_cookies);

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            tokens: TokenConfig {
                access_ttl_seconds: env_u64(
                    "ACCESS_TOKEN_TTL_SECONDS",
                    token_defaults.access_ttl_seconds,
                ),
                cleanup_interval_seconds: env_u64(
                    "TOKEN_CLEANUP_INTERVAL_SECONDS",
                    token_defaults.cleanup_interval_seconds,
                ),
                refresh_ttl_seconds: env_u64(
                    "REFRESH_TOKEN_TTL_SECONDS",
                    token_defaults.refresh_ttl_seconds,
                ),
                secure_cookies,
            },
            broadcast: BroadcastConfig {
                flush_interval_ms: env_u64(
                    "BROADCAST_FLUSH_INTERVAL_MS",
                    broadcast_defaults.flush_interval_ms,
                ),
                handshake_timeout_seconds: env_u64(
                    "WS_HANDSHAKE_TIMEOUT_SECONDS",
                    broadcast_defaults.handshake_timeout_seconds,
                ),
            },
            ledger: LedgerConfig {
                rollover_interval_seconds: env_u64(
                    "ROLLOVER_INTERVAL_SECONDS",
                    ledger_defaults.rollover_interval_seconds,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("ACCESS_TOKEN_TTL_SECONDS", self.tokens.access_ttl_seconds),
            ("REFRESH_TOKEN_TTL_SECONDS", self.tokens.refresh_ttl_seconds),
            (
                "TOKEN_CLEANUP_INTERVAL_SECONDS",
                self.tokens.cleanup_interval_seconds,
            ),
            ("BROADCAST_FLUSH_INTERVAL_MS", self.broadcast.flush_interval_ms),
            (
                "WS_HANDSHAKE_TIMEOUT_SECONDS",
                self.broadcast.handshake_timeout_seconds,
            ),
            (
                "ROLLOVER_INTERVAL_SECONDS",
                self.ledger.rollover_interval_seconds,
            ),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.tokens.refresh_ttl_seconds <= self.tokens.access_ttl_seconds {
            tracing::warn!(
                access_ttl = self.tokens.access_ttl_seconds,
                refresh_ttl = self.tokens.refresh_ttl_seconds,
                "Refresh tokens do not outlive access tokens; clients will have to sign in again \
                 instead of refreshing"
            );
        }

        if !self.tokens.secure_cookies {
            tracing::warn!("SECURE_COOKIES is disabled; session cookies will be sent over plain HTTP");
        }

        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
