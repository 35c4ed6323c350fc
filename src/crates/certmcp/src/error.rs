//! Error types for the control-plane
//!
//! Each concern owns a typed error; `CertMcpError` unifies them for the
//! entry points and maps every failure to a documented exit code.

use crate::exit::ExitCode;
use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, CertMcpError>;

/// Configuration could not be resolved
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value in one layer could not be parsed
    #[error("invalid value for {key} in {layer}: `{value}` ({reason})")]
    InvalidValue {
        key: String,
        layer: &'static str,
        value: String,
        reason: String,
    },

    /// A network transport was asked to bind a non-loopback host
    #[error("refusing to bind {transport} transport to non-loopback host `{host}`")]
    NonLoopbackBind { transport: String, host: String },

    /// Persisted settings could not be read
    #[error("failed to read persisted settings: {0}")]
    Settings(String),
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "E_CONFIG_VALUE",
            Self::NonLoopbackBind { .. } => "E_NON_LOOPBACK",
            Self::Settings(_) => "E_CONFIG_SETTINGS",
        }
    }
}

/// The external query/mutation interface failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Request rejected by the store (bad offset, bad path)
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Database failure
    #[error("database error: {0}")]
    Database(String),

    /// Attachment file failure
    #[error("attachment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store could not be opened
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::Invalid(_) => "E_INVALID",
            Self::Database(_) => "E_DATABASE",
            Self::Io(_) => "E_ATTACHMENT_IO",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// A transport binding failed
#[derive(Debug, Error)]
pub enum TransportError {
    /// Listener could not bind
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener address is not loopback
    #[error("refusing to listen on non-loopback address {0}")]
    NonLoopback(String),

    /// Malformed frame or protocol violation on the stream binding
    #[error("transport fault: {0}")]
    Fault(String),

    /// I/O failure on an established connection
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "E_BIND",
            Self::NonLoopback(_) => "E_NON_LOOPBACK",
            Self::Fault(_) => "E_TRANSPORT",
            Self::Io(_) => "E_TRANSPORT_IO",
        }
    }
}

/// The supervisor could not manage the control-plane process
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("control-plane is already {0}")]
    AlreadyActive(String),

    #[error("failed to spawn control-plane: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("control-plane did not become healthy within {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("control-plane exited during startup with status {0}")]
    ExitedDuringStartup(String),

    #[error("failed to open log sink: {0}")]
    Log(#[source] std::io::Error),
}

impl SupervisorError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyActive(_) => "E_ALREADY_ACTIVE",
            Self::Spawn(_) => "E_SPAWN",
            Self::StartupTimeout(_) => "E_STARTUP_TIMEOUT",
            Self::ExitedDuringStartup(_) => "E_STARTUP_EXIT",
            Self::Log(_) => "E_LOG_SINK",
        }
    }
}

/// The debug console could not serve or relay a request
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Missing or wrong Basic credentials
    #[error("unauthorized")]
    Unauthorized,

    /// Request body or path could not be used
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The event-stream binding could not be reached
    #[error("relay to control-plane failed: {0}")]
    Relay(String),

    /// No response event arrived in time
    #[error("control-plane did not answer within {0:?}")]
    Timeout(std::time::Duration),

    /// The control-plane answered with a JSON-RPC error
    #[error("control-plane error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl ConsoleError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_UNAUTHORIZED",
            Self::BadRequest(_) => "E_BAD_REQUEST",
            Self::Relay(_) => "E_RELAY",
            Self::Timeout(_) => "E_RELAY_TIMEOUT",
            Self::Rpc { .. } => "E_RPC",
        }
    }
}

/// Unified error for the entry points
#[derive(Debug, Error)]
pub enum CertMcpError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CertMcpError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Transport(e) => e.error_code(),
            Self::Supervisor(e) => e.error_code(),
            Self::Console(e) => e.error_code(),
            Self::Io(_) => "E_IO",
        }
    }

    /// Documented process exit status for this failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(ConfigError::NonLoopbackBind { .. }) => ExitCode::NonLoopbackRefused,
            Self::Config(_) => ExitCode::InvalidConfig,
            Self::Transport(TransportError::NonLoopback(_)) => ExitCode::NonLoopbackRefused,
            Self::Transport(TransportError::Bind { .. }) => ExitCode::BindFailed,
            Self::Transport(TransportError::Fault(_)) => ExitCode::TransportFault,
            Self::Store(_) | Self::Supervisor(_) => ExitCode::StartupFailed,
            Self::Transport(TransportError::Io(_)) | Self::Console(_) | Self::Io(_) => {
                ExitCode::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let err: CertMcpError = ConfigError::NonLoopbackBind {
            transport: "sse".into(),
            host: "0.0.0.0".into(),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::NonLoopbackRefused);
        assert_eq!(err.error_code(), "E_NON_LOOPBACK");

        let err: CertMcpError = TransportError::Bind {
            addr: "127.0.0.1:8000".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::BindFailed);

        let err: CertMcpError = StoreError::Unavailable("missing".into()).into();
        assert_eq!(err.exit_code(), ExitCode::StartupFailed);
    }

    #[test]
    fn test_display() {
        let err = ConfigError::InvalidValue {
            key: "CERT_MCP_PORT".into(),
            layer: "environment",
            value: "abc".into(),
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for CERT_MCP_PORT in environment: `abc` (invalid digit found in string)"
        );
        assert_eq!(StoreError::not_found("record", 4).to_string(), "record 4 not found");
        let err = ConsoleError::Rpc {
            code: -32601,
            message: "Method not found: x".into(),
        };
        assert_eq!(err.to_string(), "control-plane error -32601: Method not found: x");
        assert_eq!(CertMcpError::from(err).exit_code(), ExitCode::Failure);
    }
}
