//! Storage driver seam.
//!
//! A [`StoragePool`] lends one physical connection per transaction. Dropping a
//! [`StorageTransaction`] without committing rolls it back and returns the
//! connection; transaction-local settings never outlive the transaction.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::query::{Row, Statement};

/// Point-in-time pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Physical connections currently open.
    pub size: u32,
    /// Open connections not lent to any transaction.
    pub idle: u32,
}

#[async_trait]
pub trait StoragePool: Send + Sync + 'static {
    type Tx: StorageTransaction;

    /// Acquire a connection and begin a transaction on it.
    ///
    /// # Errors
    /// [`DriverError::PoolTimeout`] when no connection frees up within
    /// `acquire_timeout`; other driver errors when `BEGIN` fails.
    async fn begin(&self, acquire_timeout: Duration) -> Result<Self::Tx, DriverError>;

    fn stats(&self) -> PoolStats;
}

#[async_trait]
pub trait StorageTransaction: Send + Sized {
    /// Assign a setting for the remainder of this transaction only.
    ///
    /// # Errors
    /// [`DriverError::InvalidSetting`] when the engine rejects the setting name.
    async fn set_local(&mut self, key: &str, value: &str) -> Result<(), DriverError>;

    /// Read a setting as the engine sees it; `None` when it was never defined.
    ///
    /// # Errors
    /// Returns a driver error when the lookup fails.
    async fn current_setting(&mut self, key: &str) -> Result<Option<String>, DriverError>;

    /// Run one statement under the engine's row-level policies.
    ///
    /// # Errors
    /// [`DriverError::PolicyViolation`] when a written row fails the policy
    /// check, [`DriverError::UniqueViolation`] on duplicate keys, other driver
    /// errors on engine failures.
    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, DriverError>;

    /// # Errors
    /// Returns a driver error when the engine fails to commit.
    async fn commit(self) -> Result<(), DriverError>;

    /// # Errors
    /// Returns a driver error when the engine fails to roll back.
    async fn rollback(self) -> Result<(), DriverError>;

    /// Identifier of the physical connection, when the engine exposes one.
    fn connection_id(&self) -> Option<u64>;
}
