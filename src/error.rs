use crate::document::Document;
use crate::driver::DriverError;
use crate::schema::Violation;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Index,
    Seed,
    Fixtures,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Connect => write!(f, "connect"),
            Phase::Index => write!(f, "index"),
            Phase::Seed => write!(f, "seed"),
            Phase::Fixtures => write!(f, "fixtures"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Io,
    Parse,
    Configuration,
    Connection,
    IndexCreation,
    Seed,
    Validation,
    Conflict,
    Driver,
    Script,
    Timeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Io => "io",
            ErrorCode::Parse => "parse",
            ErrorCode::Configuration => "configuration",
            ErrorCode::Connection => "connection",
            ErrorCode::IndexCreation => "index_creation",
            ErrorCode::Seed => "seed",
            ErrorCode::Validation => "validation",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Driver => "driver",
            ErrorCode::Script => "script",
            ErrorCode::Timeout => "timeout",
        }
    }

    /// Fatal codes abort the bootstrap sequence; the rest are isolated to the
    /// operation that raised them.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::Configuration | ErrorCode::Connection | ErrorCode::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("unable to connect database '{name}': {message}")]
    Connection { name: String, message: String },
    #[error("unable to create index on {database}.{collection}: {message}")]
    IndexCreation {
        database: String,
        collection: String,
        message: String,
    },
    #[error("seeding failed for {database}.{collection}: {message}")]
    Seed {
        database: String,
        collection: String,
        message: String,
    },
    #[error("document does not match schema '{schema_key}' ({} violation(s))", .violations.len())]
    Validation {
        schema_key: String,
        violations: Vec<Violation>,
    },
    #[error("{message}")]
    Conflict { fields: Document, message: String },
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("script error: {0}")]
    Script(#[from] crate::seed::script::ScriptError),
    #[error("{phase} phase timed out")]
    Timeout { phase: Phase },
}

impl BootstrapError {
    pub fn config(message: impl Into<String>) -> Self {
        BootstrapError::Configuration {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BootstrapError::Io(_) => ErrorCode::Io,
            BootstrapError::Parse { .. } => ErrorCode::Parse,
            BootstrapError::Configuration { .. } => ErrorCode::Configuration,
            BootstrapError::Connection { .. } => ErrorCode::Connection,
            BootstrapError::IndexCreation { .. } => ErrorCode::IndexCreation,
            BootstrapError::Seed { .. } => ErrorCode::Seed,
            BootstrapError::Validation { .. } => ErrorCode::Validation,
            BootstrapError::Conflict { .. } => ErrorCode::Conflict,
            BootstrapError::Driver(_) => ErrorCode::Driver,
            BootstrapError::Script(_) => ErrorCode::Script,
            BootstrapError::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
