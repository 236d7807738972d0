#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Tenant-scoped data access.
//!
//! Three layers keep one tenant's rows away from another's:
//! - [`ScopeManager`] runs each operation in one transaction on one pooled
//!   connection, bound to the request's [`TenantContext`] through
//!   transaction-local settings;
//! - [`Repository`] adds the tenant predicate to every statement it issues;
//! - [`IsolationPolicy`] makes the engine re-filter every row against the
//!   same binding, and shows nothing when no binding is present.
//!
//! # Features
//! - `pg` (default): PostgreSQL driver on `SeaORM` / `SQLx`
//! - `integration`: tests against a PostgreSQL container
//!
//! # Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantkit_db::{MemoryEngine, Repository, ScopeManager, TenancyConfig};
//!
//! let cfg = TenancyConfig::load(Some(Path::new("tenancy.yaml")))?;
//! let engine = Arc::new(MemoryEngine::from_config(&cfg.database));
//! let scopes = ScopeManager::from_config(engine, cfg.policy.clone(), &cfg.database)?;
//! let widgets: Repository<Widget, _> = Repository::new(scopes, cfg.repository);
//!
//! let ctx = resolver.resolve(Some(&principal), None)?;
//! let mine = widgets.list(&ctx, &ListQuery::new()).await?;
//! ```

// Lets the derive macro's `::tenantkit_db::` paths resolve inside this crate.
extern crate self as tenantkit_db;

pub mod config;
pub mod driver;
pub mod error;
pub mod memory;
pub mod policy;
pub mod query;
pub mod repo;
pub mod scope;

#[cfg(feature = "pg")]
pub mod pg;
#[cfg(feature = "pg")]
mod pool_opts;

pub use config::{DatabaseConfig, PolicyConfig, RepositoryConfig, TenancyConfig, redact_dsn};
pub use driver::{PoolStats, StoragePool, StorageTransaction};
pub use error::{DbError, DriverError, ErrorKind, ScopeError};
pub use memory::{MemoryEngine, MemoryTx};
pub use policy::{
    IsolationPolicy, PolicyStatus, PolicyStore, install_policies, verify_policies,
};
pub use query::{CmpOp, Direction, Filter, OrderBy, Row, Statement};
pub use repo::{ListQuery, PageRequest, Paginated, Repository, ScopableEntity};
pub use scope::{ScopeManager, ScopedTx};

#[cfg(feature = "pg")]
pub use pg::{PgStorage, PgTx};

pub use tenantkit_db_macros::Scopable;
pub use tenantkit_security::{TenantContext, TenantId};
