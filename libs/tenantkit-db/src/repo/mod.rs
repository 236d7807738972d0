//! Policy-enforced repository.
//!
//! [`Repository<E, P>`] is the only data-access surface for a tenant-owned
//! entity. It attaches the tenant predicate to every statement itself, ANDed in
//! front of whatever the caller asked for, and runs each call through the
//! [`ScopeManager`] so the engine's isolation policy filters the same rows a
//! second time.
//!
//! The plain methods open their own scope. The `*_in` variants run on a
//! [`ScopedTx`] handed out by [`ScopeManager::with_scope`] so several calls
//! share one transaction.

mod entity;
mod page;

pub use entity::ScopableEntity;
pub use page::{ListQuery, PageRequest, Paginated};

use std::marker::PhantomData;

use serde_json::Value;
use tenantkit_security::{TenantContext, TenantId};
use tracing::{Instrument, warn};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::driver::{StoragePool, StorageTransaction};
use crate::error::{DriverError, ScopeError};
use crate::query::{Filter, OrderBy, Row, Statement, is_valid_ident};
use crate::scope::{ScopeManager, ScopedTx};

pub struct Repository<E, P: StoragePool> {
    scopes: ScopeManager<P>,
    limits: RepositoryConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E, P: StoragePool> Clone for Repository<E, P> {
    fn clone(&self) -> Self {
        Self {
            scopes: self.scopes.clone(),
            limits: self.limits,
            _entity: PhantomData,
        }
    }
}

impl<E, P> Repository<E, P>
where
    E: ScopableEntity,
    P: StoragePool,
{
    #[must_use]
    pub fn new(scopes: ScopeManager<P>, limits: RepositoryConfig) -> Self {
        Self {
            scopes,
            limits,
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeManager<P> {
        &self.scopes
    }

    /// # Errors
    /// [`ScopeError::NotFound`] when no visible row has this id.
    pub async fn find(&self, ctx: &TenantContext, id: &str) -> Result<E, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.find_in(&mut tx, id).instrument(span).await;
        tx.finish(result).await
    }

    /// # Errors
    /// [`ScopeError::InvalidQuery`] for malformed filters.
    pub async fn find_one(
        &self,
        ctx: &TenantContext,
        filter: Filter,
    ) -> Result<Option<E>, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.find_one_in(&mut tx, filter).instrument(span).await;
        tx.finish(result).await
    }

    /// # Errors
    /// [`ScopeError::InvalidQuery`] for malformed filters or ordering.
    pub async fn list(&self, ctx: &TenantContext, query: &ListQuery) -> Result<Vec<E>, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.list_in(&mut tx, query).instrument(span).await;
        tx.finish(result).await
    }

    /// # Errors
    /// [`ScopeError::InvalidQuery`] for malformed filters.
    pub async fn count(
        &self,
        ctx: &TenantContext,
        filter: Option<Filter>,
    ) -> Result<u64, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.count_in(&mut tx, filter).instrument(span).await;
        tx.finish(result).await
    }

    /// Total and page are read in the same transaction.
    ///
    /// # Errors
    /// [`ScopeError::InvalidQuery`] for page 0 or malformed filters.
    pub async fn paginate(
        &self,
        ctx: &TenantContext,
        query: &ListQuery,
        page: PageRequest,
    ) -> Result<Paginated<E>, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.paginate_in(&mut tx, query, page).instrument(span).await;
        tx.finish(result).await
    }

    /// # Errors
    /// [`ScopeError::TenantMismatch`] when the record names another tenant,
    /// [`ScopeError::Conflict`] on a duplicate id,
    /// [`ScopeError::InvalidRecord`] when the record cannot be stored.
    pub async fn create(&self, ctx: &TenantContext, record: E) -> Result<E, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.create_in(&mut tx, record).instrument(span).await;
        tx.finish(result).await
    }

    /// Apply a column patch to one row.
    ///
    /// # Errors
    /// [`ScopeError::NotFound`] when no visible row has this id,
    /// [`ScopeError::TenantMismatch`] when the patch reassigns the tenant,
    /// [`ScopeError::InvalidRecord`] when it changes the primary key or the
    /// result is not a valid record.
    pub async fn update(&self, ctx: &TenantContext, id: &str, patch: Row) -> Result<E, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.update_in(&mut tx, id, patch).instrument(span).await;
        tx.finish(result).await
    }

    /// Delete one row and return it.
    ///
    /// # Errors
    /// [`ScopeError::NotFound`] when no visible row has this id.
    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<E, ScopeError> {
        let mut tx = self.scopes.open(ctx).await?;
        let span = tx.span().clone();
        let result = self.delete_in(&mut tx, id).instrument(span).await;
        tx.finish(result).await
    }

    /// # Errors
    /// See [`Self::find`].
    pub async fn find_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        id: &str,
    ) -> Result<E, ScopeError> {
        let row = Self::fetch_row(tx, id).await?;
        decode(row)
    }

    /// # Errors
    /// See [`Self::find_one`].
    pub async fn find_one_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        filter: Filter,
    ) -> Result<Option<E>, ScopeError> {
        let statement = Statement::Select {
            table: E::TABLE.to_owned(),
            filter: scoped_filter::<E>(tx.context(), Some(filter)),
            order: vec![OrderBy::asc(E::resource_col())],
            limit: Some(1),
            offset: 0,
        };
        let rows = tx.execute(&statement).await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// # Errors
    /// See [`Self::list`].
    pub async fn list_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        query: &ListQuery,
    ) -> Result<Vec<E>, ScopeError> {
        let limit = self.limits.clamp(query.limit);
        Self::select_page(tx, query, limit, query.offset).await
    }

    /// # Errors
    /// See [`Self::count`].
    pub async fn count_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        filter: Option<Filter>,
    ) -> Result<u64, ScopeError> {
        let statement = Statement::Count {
            table: E::TABLE.to_owned(),
            filter: scoped_filter::<E>(tx.context(), filter),
        };
        let rows = tx.execute(&statement).await?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ScopeError::Storage(DriverError::Decode("count returned no value".to_owned()))
            })
    }

    /// # Errors
    /// See [`Self::paginate`].
    pub async fn paginate_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        query: &ListQuery,
        page: PageRequest,
    ) -> Result<Paginated<E>, ScopeError> {
        if page.page == 0 {
            return Err(ScopeError::InvalidQuery("page numbers start at 1".to_owned()));
        }
        let page_size = self.limits.clamp(Some(page.page_size));
        let offset = (page.page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| ScopeError::InvalidQuery("page out of range".to_owned()))?;

        let total = self.count_in(tx, query.filter.clone()).await?;
        let items = Self::select_page(tx, query, page_size, offset).await?;
        Ok(Paginated::new(items, total, page.page, page_size))
    }

    /// # Errors
    /// See [`Self::create`].
    pub async fn create_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        record: E,
    ) -> Result<E, ScopeError> {
        let mut row = encode(&record)?;
        prepare_insert::<E>(tx.context(), &mut row)?;
        let statement = Statement::Insert {
            table: E::TABLE.to_owned(),
            row,
        };
        let rows = tx.execute(&statement).await.inspect_err(|err| {
            if matches!(err, ScopeError::TenantMismatch { .. }) {
                warn!(table = E::TABLE, "storage policy rejected the inserted row");
            }
        })?;
        first_row(rows).and_then(decode)
    }

    /// # Errors
    /// See [`Self::update`].
    pub async fn update_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        id: &str,
        mut patch: Row,
    ) -> Result<E, ScopeError> {
        let existing = Self::fetch_row(tx, id).await?;

        if let Some(bad) = patch.keys().find(|k| !is_valid_ident(k)) {
            return Err(ScopeError::InvalidRecord(format!("invalid column name '{bad}'")));
        }
        if let Some(requested) = patch.remove(E::tenant_col()) {
            let current = existing.get(E::tenant_col());
            if current.and_then(column_text) != column_text(&requested) {
                warn!(
                    table = E::TABLE,
                    id,
                    "update attempted to reassign the owning tenant"
                );
                return Err(ScopeError::TenantMismatch {
                    table: E::TABLE.to_owned(),
                });
            }
        }
        if let Some(requested) = patch.remove(E::resource_col())
            && column_text(&requested).as_deref() != Some(id)
        {
            return Err(ScopeError::InvalidRecord(format!(
                "{} cannot be changed",
                E::resource_col()
            )));
        }
        if patch.is_empty() {
            return decode(existing);
        }

        let mut merged = existing;
        merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        serde_json::from_value::<E>(Value::Object(merged))
            .map_err(|err| ScopeError::InvalidRecord(err.to_string()))?;

        let statement = Statement::Update {
            table: E::TABLE.to_owned(),
            filter: Self::by_id(tx.context(), id),
            patch,
        };
        let rows = tx.execute(&statement).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Self::not_found(id))
            .and_then(decode)
    }

    /// # Errors
    /// See [`Self::delete`].
    pub async fn delete_in<T: StorageTransaction>(
        &self,
        tx: &mut ScopedTx<T>,
        id: &str,
    ) -> Result<E, ScopeError> {
        let statement = Statement::Delete {
            table: E::TABLE.to_owned(),
            filter: Self::by_id(tx.context(), id),
        };
        let rows = tx.execute(&statement).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Self::not_found(id))
            .and_then(decode)
    }

    async fn fetch_row<T: StorageTransaction>(
        tx: &mut ScopedTx<T>,
        id: &str,
    ) -> Result<Row, ScopeError> {
        let statement = Statement::Select {
            table: E::TABLE.to_owned(),
            filter: Self::by_id(tx.context(), id),
            order: Vec::new(),
            limit: Some(1),
            offset: 0,
        };
        let rows = tx.execute(&statement).await?;
        rows.into_iter().next().ok_or_else(|| Self::not_found(id))
    }

    async fn select_page<T: StorageTransaction>(
        tx: &mut ScopedTx<T>,
        query: &ListQuery,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<E>, ScopeError> {
        let mut order = query.order.clone();
        // stable pagination
        if !order.iter().any(|o| o.column == E::resource_col()) {
            order.push(OrderBy::asc(E::resource_col()));
        }
        let statement = Statement::Select {
            table: E::TABLE.to_owned(),
            filter: scoped_filter::<E>(tx.context(), query.filter.clone()),
            order,
            limit: Some(limit),
            offset,
        };
        let rows = tx.execute(&statement).await?;
        rows.into_iter().map(decode).collect()
    }

    fn by_id(ctx: &TenantContext, id: &str) -> Filter {
        scoped_filter::<E>(ctx, Some(Filter::eq(E::resource_col(), id)))
    }

    fn not_found(id: &str) -> ScopeError {
        ScopeError::NotFound {
            table: E::TABLE,
            id: id.to_owned(),
        }
    }
}

/// Tenant clause first, caller filter ANDed after it.
fn scoped_filter<E: ScopableEntity>(ctx: &TenantContext, filter: Option<Filter>) -> Filter {
    let tenant = ctx
        .tenant_id()
        .map(|tenant| Filter::eq(E::tenant_col(), tenant.as_str()));
    match (tenant, filter) {
        (Some(tenant), Some(filter)) => tenant.and(filter),
        (Some(tenant), None) => tenant,
        (None, Some(filter)) => filter,
        (None, None) => Filter::True,
    }
}

/// Stamp the tenant and id columns of a new row.
fn prepare_insert<E: ScopableEntity>(ctx: &TenantContext, row: &mut Row) -> Result<(), ScopeError> {
    let supplied = row
        .get(E::tenant_col())
        .and_then(column_text)
        .filter(|v| !v.is_empty());

    match (ctx.tenant_id(), supplied) {
        (Some(active), None) => {
            row.insert(
                E::tenant_col().to_owned(),
                Value::String(active.as_str().to_owned()),
            );
        }
        (Some(active), Some(supplied)) => {
            if supplied != active.as_str() {
                warn!(
                    table = E::TABLE,
                    active = %active,
                    "create rejected: record names a different tenant"
                );
                return Err(ScopeError::TenantMismatch {
                    table: E::TABLE.to_owned(),
                });
            }
        }
        (None, None) => {
            return Err(ScopeError::InvalidRecord(format!(
                "{} is required when tenant filtering is bypassed",
                E::tenant_col()
            )));
        }
        (None, Some(supplied)) => {
            TenantId::new(supplied).map_err(|err| ScopeError::InvalidRecord(err.to_string()))?;
        }
    }

    let has_id = row
        .get(E::resource_col())
        .and_then(column_text)
        .is_some_and(|v| !v.is_empty());
    if !has_id {
        row.insert(
            E::resource_col().to_owned(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    Ok(())
}

fn column_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn encode<E: ScopableEntity>(record: &E) -> Result<Row, ScopeError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(ScopeError::InvalidRecord(format!(
            "{} records must serialize to an object",
            E::TABLE
        ))),
        Err(err) => Err(ScopeError::InvalidRecord(err.to_string())),
    }
}

fn decode<E: ScopableEntity>(row: Row) -> Result<E, ScopeError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|err| ScopeError::Storage(DriverError::Decode(err.to_string())))
}

fn first_row(rows: Vec<Row>) -> Result<Row, ScopeError> {
    rows.into_iter().next().ok_or_else(|| {
        ScopeError::Storage(DriverError::Decode("statement returned no row".to_owned()))
    })
}
