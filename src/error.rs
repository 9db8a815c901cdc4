use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// The first group is the protocol-level taxonomy reported to clients through
/// structured `error` events; the rest are infrastructure failures that stay
/// server-side.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Authentication & Token Errors =====
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    /// A refresh token was presented after it had already been rotated.
    /// Rendered to callers as an ordinary invalid-token rejection; the
    /// distinction exists for logging and tests only.
    #[error("refresh token reuse detected")]
    RefreshReuseDetected,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ===== Gateway Operation Errors =====
    #[error("not a member of conversation {0}")]
    NotARoomMember(String),

    #[error("connection not found")]
    ConnectionNotFound,

    #[error("validation error: {0}")]
    Validation(String),

    // ===== Infrastructure Errors =====
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code carried in `error` events.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AuthenticationRequired => "authentication_required",
            // Reuse detection must be indistinguishable from an ordinary
            // invalid token on the wire.
            AppError::InvalidToken(_) | AppError::RefreshReuseDetected => "invalid_token",
            AppError::TokenExpired => "token_expired",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::NotARoomMember(_) => "not_a_room_member",
            AppError::ConnectionNotFound => "connection_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Jwt(_) => "invalid_token",
            AppError::Redis(_) => "broker_error",
            AppError::Serialization(_) | AppError::Deserialization(_) | AppError::Json(_) => {
                "serialization_error"
            }
            AppError::Io(_) => "io_error",
            AppError::WebSocket(_) => "websocket_error",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// User-facing message without sensitive details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::AuthenticationRequired => "Authentication is required".to_string(),
            AppError::InvalidToken(_) | AppError::RefreshReuseDetected | AppError::Jwt(_) => {
                "Invalid or expired token".to_string()
            }
            AppError::TokenExpired => "Token has expired".to_string(),
            AppError::RateLimited { retry_after_secs } => {
                format!("Too many attempts. Retry after {} seconds", retry_after_secs)
            }
            AppError::NotARoomMember(id) => {
                format!("You are not a member of conversation {}", id)
            }
            AppError::ConnectionNotFound => "Connection not found".to_string(),
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Log with a level matching the failure class.
    pub fn log(&self) {
        match self {
            AppError::RefreshReuseDetected => {
                tracing::warn!(error_code = %self.error_code(), "Refresh token replay detected");
            }
            AppError::AuthenticationRequired
            | AppError::InvalidToken(_)
            | AppError::TokenExpired
            | AppError::Jwt(_)
            | AppError::RateLimited { .. } => {
                tracing::warn!(error = %self, error_code = %self.error_code(), "Authentication failed");
            }
            AppError::NotARoomMember(_)
            | AppError::ConnectionNotFound
            | AppError::Validation(_) => {
                tracing::debug!(error = %self, error_code = %self.error_code(), "Client error");
            }
            _ => {
                tracing::error!(error = %self, error_code = %self.error_code(), "Server error");
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocket(err.to_string())
    }
}

impl AppError {
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        AppError::InvalidToken(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
