use std::time::Duration;

pub use tenantkit_security::ErrorKind;
use tenantkit_security::StatusCode;

use crate::policy::PolicyStatus;

/// Failure reported by a storage driver.
///
/// Never surfaced to callers directly: the scope manager and repository
/// translate it into a [`ScopeError`], keeping it as the error source.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("timed out acquiring a pooled connection after {}ms", .0.as_millis())]
    PoolTimeout(Duration),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("invalid setting name '{0}'")]
    InvalidSetting(String),

    #[error("row violates the isolation policy of '{table}'")]
    PolicyViolation { table: String },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("duplicate key in '{table}': {detail}")]
    UniqueViolation { table: String, detail: String },

    /// Another open transaction holds the row being written.
    #[error("concurrent write to the same row in '{table}'")]
    WriteConflict { table: String },

    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors of tenant-scoped data access.
///
/// `Display` never includes raw engine messages; those stay in the source chain.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// The record names a tenant other than the active one, or the engine's
    /// isolation policy rejected the written row.
    #[error("record tenant does not match the active tenant context ({table})")]
    TenantMismatch { table: String },

    /// The transaction-local tenant binding could not be established.
    #[error("failed to bind tenant context to the connection")]
    TenantBinding {
        #[source]
        source: DriverError,
    },

    #[error("timed out waiting for a database connection")]
    PoolTimeout,

    #[error("{table} '{id}' not found")]
    NotFound { table: &'static str, id: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("record conflicts with an existing one ({table})")]
    Conflict { table: String },

    #[error("storage operation failed")]
    Storage(#[source] DriverError),
}

impl ScopeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TenantMismatch { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::TenantBinding { .. } | Self::Storage(_) => ErrorKind::Internal,
            Self::PoolTimeout => ErrorKind::Unavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidRecord(_) | Self::InvalidQuery(_) => ErrorKind::BadRequest,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::TenantBinding { .. } => "TENANT_BINDING",
            Self::PoolTimeout => "POOL_TIMEOUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidRecord(_) => "INVALID_RECORD",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::Conflict { .. } => "CONFLICT",
            Self::Storage(_) => "STORAGE",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }
}

impl From<DriverError> for ScopeError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::PoolTimeout(_) => Self::PoolTimeout,
            DriverError::PolicyViolation { table } => Self::TenantMismatch { table },
            DriverError::UniqueViolation { table, .. } | DriverError::WriteConflict { table } => {
                Self::Conflict { table }
            }
            DriverError::InvalidStatement(msg) => Self::InvalidQuery(msg),
            other => Self::Storage(other),
        }
    }
}

/// Setup-time errors: configuration, connecting, installing and verifying policies.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("failed to connect to {dsn}")]
    Connect {
        dsn: String,
        #[source]
        source: DriverError,
    },

    #[error("isolation policy '{policy}' on '{table}' is not enforced")]
    PolicyNotEnforced {
        table: String,
        policy: String,
        status: PolicyStatus,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}
