use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    // Request errors
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("ordinal {ordinal} is out of bounds (valid range 1..={len})")]
    OutOfBounds { ordinal: i64, len: usize },

    #[error("access denied: path not allowed: {path}")]
    PermissionDenied { path: String },

    // Config file errors
    #[error("failed to read config file {path}: {source}")]
    ConfigFormat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Storage errors
    #[error("storage error: {0}")]
    Storage(object_store::Error),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    // Execution errors
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with code {}", .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExecutionFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    // Service config errors
    #[error("config error: {0}")]
    Config(String),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<object_store::Error> for GatewayError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => GatewayError::NotFound { what: path },
            other => GatewayError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GatewayError::NotFound { what: what.into() }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NotFound { .. } => 404,

            GatewayError::BadRequest(_) | GatewayError::OutOfBounds { .. } => 400,

            GatewayError::PermissionDenied { .. } => 403,

            GatewayError::Unsupported(_) => 501,

            _ => 500,
        }
    }
}
