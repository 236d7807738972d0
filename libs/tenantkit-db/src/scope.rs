//! Connection scope manager.
//!
//! Every tenant-scoped data access runs in exactly one transaction on exactly
//! one pooled connection. The tenant binding is issued as transaction-local
//! settings right after `BEGIN`, so the engine drops it when the transaction
//! ends however it ends: commit, rollback, or the transaction being dropped
//! by a cancelled task. There is no unbind step that could be skipped.
//!
//! ```ignore
//! let widget = scopes
//!     .with_scope(&ctx, |tx| {
//!         Box::pin(async move {
//!             let w = widgets.create_in(tx, widget).await?;
//!             audit_log.create_in(tx, entry_for(&w)).await?;
//!             Ok::<_, ScopeError>(w)
//!         })
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tenantkit_security::{AUDIT_TARGET, ContextScope, TenantContext, TenantId};
use tracing::{Instrument, Span, debug, info_span, warn};

use crate::config::{DatabaseConfig, PolicyConfig};
use crate::driver::{StoragePool, StorageTransaction};
use crate::error::{DbError, DriverError, ScopeError};
use crate::query::{Row, Statement};

/// Opens tenant-bound transactions on a storage pool.
pub struct ScopeManager<P: StoragePool> {
    pool: Arc<P>,
    policy: PolicyConfig,
    acquire_timeout: Duration,
}

impl<P: StoragePool> Clone for ScopeManager<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            policy: self.policy.clone(),
            acquire_timeout: self.acquire_timeout,
        }
    }
}

impl<P: StoragePool> ScopeManager<P> {
    /// # Errors
    /// [`DbError::InvalidConfig`] when the setting or policy names are malformed.
    pub fn new(
        pool: Arc<P>,
        policy: PolicyConfig,
        acquire_timeout: Duration,
    ) -> Result<Self, DbError> {
        policy.validate()?;
        Ok(Self {
            pool,
            policy,
            acquire_timeout,
        })
    }

    /// # Errors
    /// See [`Self::new`].
    pub fn from_config(
        pool: Arc<P>,
        policy: PolicyConfig,
        db: &DatabaseConfig,
    ) -> Result<Self, DbError> {
        Self::new(pool, policy, db.acquire_timeout)
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    #[must_use]
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Run `op` inside one tenant-bound transaction.
    ///
    /// Commits when `op` returns `Ok`, rolls back when it returns `Err`.
    ///
    /// # Errors
    /// [`ScopeError::PoolTimeout`] when no connection frees up in time,
    /// [`ScopeError::TenantBinding`] when the binding is rejected (`op` never
    /// runs), [`ScopeError::Storage`] when the commit fails, or whatever `op`
    /// returns.
    pub async fn with_scope<T, E, F>(&self, ctx: &TenantContext, op: F) -> Result<T, E>
    where
        T: Send,
        E: From<ScopeError> + Send,
        F: for<'a> FnOnce(
                &'a mut ScopedTx<P::Tx>,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
    {
        let mut scoped = self.open(ctx).await.map_err(E::from)?;
        let span = scoped.span.clone();
        let result = op(&mut scoped).instrument(span).await;
        scoped.finish(result).await
    }

    /// Acquire, begin and bind. The caller must [`ScopedTx::finish`] it.
    pub(crate) async fn open(&self, ctx: &TenantContext) -> Result<ScopedTx<P::Tx>, ScopeError> {
        let span = info_span!(
            "tenant_scope",
            tenant = ctx.tenant_id().map(TenantId::as_str),
            bypass = ctx.is_bypass(),
            conn_id = tracing::field::Empty,
        );

        let mut tx = self
            .pool
            .begin(self.acquire_timeout)
            .instrument(span.clone())
            .await
            .map_err(|err| match err {
                DriverError::PoolTimeout(waited) => {
                    warn!(
                        parent: &span,
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        "timed out acquiring a connection"
                    );
                    ScopeError::PoolTimeout
                }
                other => ScopeError::Storage(other),
            })?;

        if let Some(conn_id) = tx.connection_id() {
            span.record("conn_id", conn_id);
        }

        if let Err(source) = bind(&mut tx, &self.policy, ctx)
            .instrument(span.clone())
            .await
        {
            warn!(parent: &span, error = %source, "tenant binding rejected, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(parent: &span, error = %rollback_err, "rollback after binding failure failed");
            }
            return Err(ScopeError::TenantBinding { source });
        }

        if let ContextScope::Bypass { reason } = ctx.scope() {
            warn!(
                target: AUDIT_TARGET,
                parent: &span,
                subject_id = %ctx.subject_id(),
                reason = %reason,
                "tenant bypass scope opened"
            );
        }

        Ok(ScopedTx {
            tx,
            ctx: ctx.clone(),
            span,
        })
    }
}

async fn bind<T: StorageTransaction>(
    tx: &mut T,
    policy: &PolicyConfig,
    ctx: &TenantContext,
) -> Result<(), DriverError> {
    match ctx.scope() {
        ContextScope::Tenant(tenant) => {
            tx.set_local(&policy.tenant_setting, tenant.as_str()).await?;
            tx.set_local(&policy.bypass_setting, "off").await?;
        }
        ContextScope::Bypass { .. } => {
            tx.set_local(&policy.bypass_setting, "on").await?;
            tx.set_local(&policy.tenant_setting, "").await?;
        }
    }
    debug!(
        tenant_setting = %policy.tenant_setting,
        bypass = ctx.is_bypass(),
        "bound tenant context to transaction"
    );
    Ok(())
}

/// One open transaction bound to one tenant context.
///
/// Only reachable inside [`ScopeManager::with_scope`]; repositories take it
/// through their `*_in` methods.
pub struct ScopedTx<T: StorageTransaction> {
    tx: T,
    ctx: TenantContext,
    span: Span,
}

impl<T: StorageTransaction> ScopedTx<T> {
    #[must_use]
    pub fn context(&self) -> &TenantContext {
        &self.ctx
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<u64> {
        self.tx.connection_id()
    }

    /// Read a setting as the engine sees it inside this transaction.
    ///
    /// # Errors
    /// [`ScopeError::Storage`] when the lookup fails.
    pub async fn current_setting(&mut self, key: &str) -> Result<Option<String>, ScopeError> {
        self.tx
            .current_setting(key)
            .await
            .map_err(ScopeError::Storage)
    }

    pub(crate) async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, ScopeError> {
        debug!(
            parent: &self.span,
            kind = statement.kind(),
            table = statement.table(),
            "executing statement"
        );
        self.tx
            .execute(statement)
            .instrument(self.span.clone())
            .await
            .map_err(ScopeError::from)
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Commit on `Ok`, roll back on `Err`.
    pub(crate) async fn finish<R, E>(self, result: Result<R, E>) -> Result<R, E>
    where
        E: From<ScopeError>,
    {
        let Self { tx, span, .. } = self;
        match result {
            Ok(value) => {
                tx.commit()
                    .instrument(span.clone())
                    .await
                    .map_err(|err| E::from(ScopeError::Storage(err)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().instrument(span.clone()).await {
                    warn!(parent: &span, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
