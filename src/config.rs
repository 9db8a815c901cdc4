use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HEALTH_PORT: u16 = 8081;

// Token lifetimes
const DEFAULT_ACCESS_TOKEN_TTL_MINS: i64 = 15;
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;

// Handshake must present a valid access token within this window or the
// connection is dropped without allocating session state.
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 5;

// Typing indicator debounce: a typing-start arms this timer; its expiry is
// the authoritative typing-stop unless an explicit stop arrives first.
const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 3000;

// Authentication attempt limiting (per identifier+origin)
const DEFAULT_AUTH_WINDOW_SECS: u64 = 3600;
const DEFAULT_AUTH_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_AUTH_LOCKOUT_SECS: u64 = 900;

// Tighter limits for password-reset / registration flows
const DEFAULT_SENSITIVE_WINDOW_SECS: u64 = 3600;
const DEFAULT_SENSITIVE_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SENSITIVE_LOCKOUT_SECS: u64 = 3600;

// Registry/blacklist/limiter housekeeping interval
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

const DEFAULT_FANOUT_CHANNEL: &str = "courier:events";

/// Inbound WebSocket frames larger than this are rejected without parsing.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
}

/// Sliding-window failure limits for one authentication flow.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_attempts: u32,
    pub lockout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub health_port: u16,

    /// Fan-out broker. `None` means single-process mode: room broadcasts only
    /// reach sockets on this process.
    pub redis_url: Option<String>,
    pub fanout_channel: String,

    /// Symmetric secret for HS256 mode. Empty when running RS256.
    pub jwt_secret: String,
    /// RSA private key PEM for RS256 signing. Absent in verify-only mode.
    pub jwt_private_key: Option<String>,
    /// RSA public key PEM for RS256 verification.
    pub jwt_public_key: Option<String>,
    pub jwt_issuer: String,
    pub jwt_audience: String,

    pub access_token_ttl_mins: i64,
    pub refresh_token_ttl_days: i64,

    pub handshake_timeout_secs: u64,
    pub typing_debounce_ms: u64,
    pub sweep_interval_secs: u64,

    pub auth_rate_limit: RateLimitConfig,
    pub sensitive_rate_limit: RateLimitConfig,

    pub logging: LoggingConfig,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let has_rsa_keys =
            std::env::var("JWT_PRIVATE_KEY").is_ok() || std::env::var("JWT_PUBLIC_KEY").is_ok();

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            health_port: std::env::var("HEALTH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_HEALTH_PORT),
            redis_url: std::env::var("REDIS_URL").ok(),
            fanout_channel: std::env::var("FANOUT_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_FANOUT_CHANNEL.to_string()),
            jwt_secret: if has_rsa_keys {
                // RS256 mode: secret is optional
                std::env::var("JWT_SECRET").unwrap_or_default()
            } else {
                let secret = std::env::var("JWT_SECRET")?;
                if secret.len() < 32 {
                    anyhow::bail!("JWT_SECRET must be at least 32 bytes");
                }
                secret
            },
            jwt_private_key: std::env::var("JWT_PRIVATE_KEY").ok(),
            jwt_public_key: std::env::var("JWT_PUBLIC_KEY").ok(),
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "courier-server".to_string()),
            jwt_audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "courier-clients".to_string()),
            access_token_ttl_mins: std::env::var("ACCESS_TOKEN_TTL_MINS")
                .ok()
                .and_then(|m| m.parse().ok())
                .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_MINS),
            refresh_token_ttl_days: std::env::var("REFRESH_TOKEN_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            handshake_timeout_secs: std::env::var("HANDSHAKE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            typing_debounce_ms: std::env::var("TYPING_DEBOUNCE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TYPING_DEBOUNCE_MS),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            auth_rate_limit: RateLimitConfig {
                window_secs: std::env::var("AUTH_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_AUTH_WINDOW_SECS),
                max_attempts: std::env::var("AUTH_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_AUTH_MAX_ATTEMPTS),
                lockout_secs: std::env::var("AUTH_LOCKOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_AUTH_LOCKOUT_SECS),
            },
            sensitive_rate_limit: RateLimitConfig {
                window_secs: std::env::var("SENSITIVE_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SENSITIVE_WINDOW_SECS),
                max_attempts: std::env::var("SENSITIVE_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SENSITIVE_MAX_ATTEMPTS),
                lockout_secs: std::env::var("SENSITIVE_LOCKOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SENSITIVE_LOCKOUT_SECS),
            },
            logging: LoggingConfig {
                enable_user_identifiers: std::env::var("LOG_USER_IDENTIFIERS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                hash_salt: {
                    let salt = std::env::var("LOG_HASH_SALT")
                        .unwrap_or_else(|_| "default-salt-please-change".to_string());
                    if salt.is_empty() || salt == "default-salt-please-change" {
                        anyhow::bail!("LOG_HASH_SALT must be set to a unique, secret value");
                    }
                    salt
                },
            },
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
