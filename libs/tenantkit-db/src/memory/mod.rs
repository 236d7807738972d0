//! In-process storage engine.
//!
//! A pooled, transactional engine for tests and local development that
//! enforces the same isolation predicate as the PostgreSQL policy. Each pooled
//! connection keeps a session settings map; `set_local` values shadow it until
//! the transaction ends, after which the key reads back as an empty string,
//! the way PostgreSQL reports a custom setting that has been reset.
//!
//! Writes are staged per transaction and applied on commit. Dropping a
//! transaction discards them and returns the connection to the pool.
//!
//! Every primary key a transaction writes is locked until the transaction
//! ends. A second transaction touching a locked key fails at once instead of
//! waiting: an insert reports a duplicate key, an update or delete reports a
//! write conflict.

mod eval;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::DatabaseConfig;
use crate::driver::{PoolStats, StoragePool, StorageTransaction};
use crate::error::DriverError;
use crate::policy::{IsolationPolicy, PolicyStatus, PolicyStore};
use crate::query::{Filter, OrderBy, Row, Statement, is_valid_ident, is_valid_setting};
use crate::repo::ScopableEntity;

/// Pooled in-process engine. Clones share the same tables and pool.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<Engine>,
}

struct Engine {
    tables: RwLock<HashMap<String, Table>>,
    permits: Arc<Semaphore>,
    // LIFO: the most recently released connection is lent next.
    idle: Mutex<Vec<Connection>>,
    opened: AtomicU64,
    seq: AtomicU64,
    txs: AtomicU64,
    // (table, pk) -> owning transaction
    locks: Mutex<HashMap<(String, String), u64>>,
}

struct Connection {
    id: u64,
    session: HashMap<String, String>,
}

#[derive(Clone)]
struct StoredRow {
    seq: u64,
    data: Row,
}

struct Table {
    pk: String,
    rows: BTreeMap<String, StoredRow>,
    row_security: bool,
    policy: Option<RowPolicy>,
}

struct RowPolicy {
    name: String,
    tenant_col: String,
    tenant_setting: String,
    bypass_setting: String,
}

impl MemoryEngine {
    /// Engine whose pool lends at most `max_conns` connections at once.
    #[must_use]
    pub fn new(max_conns: u32) -> Self {
        let permits = usize::try_from(max_conns.max(1)).unwrap_or(usize::MAX);
        Self {
            inner: Arc::new(Engine {
                tables: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(permits)),
                idle: Mutex::new(Vec::new()),
                opened: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                txs: AtomicU64::new(0),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn from_config(cfg: &DatabaseConfig) -> Self {
        Self::new(cfg.max_conns)
    }

    /// Create an empty table keyed by `pk`. Existing tables are left untouched.
    ///
    /// # Errors
    /// [`DriverError::InvalidStatement`] for invalid identifiers.
    pub fn create_table(&self, name: &str, pk: &str) -> Result<(), DriverError> {
        if !is_valid_ident(name) || !is_valid_ident(pk) {
            return Err(DriverError::InvalidStatement(format!(
                "invalid table definition '{name}' ({pk})"
            )));
        }
        self.inner
            .tables
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Table {
                pk: pk.to_owned(),
                rows: BTreeMap::new(),
                row_security: false,
                policy: None,
            });
        Ok(())
    }

    /// Create the table backing an entity type.
    ///
    /// # Errors
    /// See [`Self::create_table`].
    pub fn create_table_for<E: ScopableEntity>(&self) -> Result<(), DriverError> {
        self.create_table(E::TABLE, E::resource_col())
    }

    /// Administrative inspection of committed rows, ignoring every policy.
    ///
    /// # Errors
    /// [`DriverError::UnknownTable`] when the table does not exist.
    pub fn committed_rows(&self, table: &str) -> Result<Vec<Row>, DriverError> {
        let tables = self.inner.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| DriverError::UnknownTable(table.to_owned()))?;
        Ok(t.rows.values().map(|r| r.data.clone()).collect())
    }

    /// Stop lending connections; pending and future `begin` calls fail.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    fn open_connection(&self) -> Connection {
        let id = self.inner.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(conn_id = id, "opened in-process connection");
        Connection {
            id,
            session: HashMap::new(),
        }
    }
}

#[async_trait]
impl StoragePool for MemoryEngine {
    type Tx = MemoryTx;

    async fn begin(&self, acquire_timeout: Duration) -> Result<MemoryTx, DriverError> {
        let permit = tokio::time::timeout(
            acquire_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| DriverError::PoolTimeout(acquire_timeout))?
        .map_err(|_| DriverError::PoolClosed)?;

        let reused = self.inner.idle.lock().pop();
        let conn = reused.unwrap_or_else(|| self.open_connection());
        Ok(MemoryTx {
            id: self.inner.txs.fetch_add(1, Ordering::SeqCst) + 1,
            engine: Arc::clone(&self.inner),
            conn: Some(conn),
            local: HashMap::new(),
            pending_session: HashMap::new(),
            staged: HashMap::new(),
            held: Vec::new(),
            _permit: permit,
        })
    }

    fn stats(&self) -> PoolStats {
        let size = self.inner.opened.load(Ordering::SeqCst);
        let idle = self.inner.idle.lock().len();
        PoolStats {
            size: u32::try_from(size).unwrap_or(u32::MAX),
            idle: u32::try_from(idle).unwrap_or(u32::MAX),
        }
    }
}

/// One transaction on one pooled in-process connection.
pub struct MemoryTx {
    id: u64,
    engine: Arc<Engine>,
    conn: Option<Connection>,
    local: HashMap<String, String>,
    pending_session: HashMap<String, String>,
    // table -> pk -> staged row (None = deleted)
    staged: HashMap<String, BTreeMap<String, Option<StoredRow>>>,
    held: Vec<(String, String)>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryTx {
    /// Session-level assignment (plain `SET`): kept on the physical connection
    /// after this transaction commits, discarded if it rolls back.
    ///
    /// # Errors
    /// [`DriverError::InvalidSetting`] for malformed setting names.
    pub fn set_session(&mut self, key: &str, value: &str) -> Result<(), DriverError> {
        check_setting(key)?;
        self.pending_session
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn setting(&self, key: &str) -> Option<&str> {
        self.local
            .get(key)
            .or_else(|| self.pending_session.get(key))
            .or_else(|| self.conn.as_ref().and_then(|c| c.session.get(key)))
            .map(String::as_str)
    }

    fn visible(&self, table: &Table, row: &Row) -> bool {
        if !table.row_security {
            return true;
        }
        // row security without a policy hides everything
        let Some(policy) = &table.policy else {
            return false;
        };
        if self.setting(&policy.bypass_setting).unwrap_or_default() == "on" {
            return true;
        }
        match self.setting(&policy.tenant_setting).filter(|v| !v.is_empty()) {
            Some(tenant) => row
                .get(&policy.tenant_col)
                .and_then(eval::value_text)
                .is_some_and(|owner| owner == tenant),
            None => false,
        }
    }

    fn current(&self, name: &str, table: &Table, pk: &str) -> Option<StoredRow> {
        match self.staged.get(name).and_then(|overlay| overlay.get(pk)) {
            Some(staged) => staged.clone(),
            None => table.rows.get(pk).cloned(),
        }
    }

    fn snapshot(&self, name: &str, table: &Table) -> BTreeMap<String, StoredRow> {
        let mut rows = table.rows.clone();
        if let Some(overlay) = self.staged.get(name) {
            for (pk, staged) in overlay {
                match staged {
                    Some(row) => {
                        rows.insert(pk.clone(), row.clone());
                    }
                    None => {
                        rows.remove(pk);
                    }
                }
            }
        }
        rows
    }

    fn visible_matching(&self, name: &str, table: &Table, filter: &Filter) -> Vec<(String, StoredRow)> {
        self.snapshot(name, table)
            .into_iter()
            .filter(|(_, row)| self.visible(table, &row.data) && eval::matches(filter, &row.data))
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.engine.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Take the row lock on `pk`; false when another transaction holds it.
    fn lock_row(&mut self, name: &str, pk: &str) -> bool {
        let key = (name.to_owned(), pk.to_owned());
        let mut locks = self.engine.locks.lock();
        match locks.get(&key) {
            Some(owner) => *owner == self.id,
            None => {
                locks.insert(key.clone(), self.id);
                self.held.push(key);
                true
            }
        }
    }

    fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut locks = self.engine.locks.lock();
        for key in self.held.drain(..) {
            locks.remove(&key);
        }
    }

    fn stage(&mut self, name: &str, pk: String, row: Option<StoredRow>) {
        self.staged
            .entry(name.to_owned())
            .or_default()
            .insert(pk, row);
    }

    fn run(&mut self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        statement
            .validate()
            .map_err(DriverError::InvalidStatement)?;
        let engine = Arc::clone(&self.engine);
        let tables = engine.tables.read();
        let name = statement.table();
        let table = tables
            .get(name)
            .ok_or_else(|| DriverError::UnknownTable(name.to_owned()))?;

        match statement {
            Statement::Select {
                filter,
                order,
                limit,
                offset,
                ..
            } => Ok(self.select(name, table, filter, order, *limit, *offset)),
            Statement::Count { filter, .. } => {
                let count = self.visible_matching(name, table, filter).len();
                let mut row = Row::new();
                row.insert("count".to_owned(), Value::from(count));
                Ok(vec![row])
            }
            Statement::Insert { row, .. } => self.insert(name, table, row),
            Statement::Update { filter, patch, .. } => self.update(name, table, filter, patch),
            Statement::Delete { filter, .. } => self.delete(name, table, filter),
        }
    }

    fn select(
        &self,
        name: &str,
        table: &Table,
        filter: &Filter,
        order: &[OrderBy],
        limit: Option<u64>,
        offset: u64,
    ) -> Vec<Row> {
        let mut rows: Vec<StoredRow> = self
            .visible_matching(name, table, filter)
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        rows.sort_by(|a, b| eval::compare_rows(&a.data, &b.data, order));
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        rows.into_iter()
            .skip(skip)
            .take(take)
            .map(|row| row.data)
            .collect()
    }

    fn primary_key(table: &Table, row: &Row) -> Result<String, DriverError> {
        row.get(&table.pk)
            .and_then(eval::value_text)
            .ok_or_else(|| {
                DriverError::InvalidStatement(format!("missing primary key column '{}'", table.pk))
            })
    }

    fn insert(&mut self, name: &str, table: &Table, row: &Row) -> Result<Vec<Row>, DriverError> {
        let pk = Self::primary_key(table, row)?;
        if !self.visible(table, row) {
            return Err(DriverError::PolicyViolation {
                table: name.to_owned(),
            });
        }
        if !self.lock_row(name, &pk) || self.current(name, table, &pk).is_some() {
            return Err(DriverError::UniqueViolation {
                table: name.to_owned(),
                detail: format!("{}={pk}", table.pk),
            });
        }
        let stored = StoredRow {
            seq: self.next_seq(),
            data: row.clone(),
        };
        self.stage(name, pk, Some(stored));
        Ok(vec![row.clone()])
    }

    fn update(
        &mut self,
        name: &str,
        table: &Table,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<Row>, DriverError> {
        let targets = self.visible_matching(name, table, filter);
        let mut changes = Vec::with_capacity(targets.len());
        for (pk, stored) in targets {
            let mut data = stored.data;
            for (col, value) in patch {
                data.insert(col.clone(), value.clone());
            }
            if !self.visible(table, &data) {
                return Err(DriverError::PolicyViolation {
                    table: name.to_owned(),
                });
            }
            if !self.lock_row(name, &pk) {
                return Err(DriverError::WriteConflict {
                    table: name.to_owned(),
                });
            }
            let new_pk = Self::primary_key(table, &data)?;
            if new_pk != pk
                && (!self.lock_row(name, &new_pk) || self.current(name, table, &new_pk).is_some())
            {
                return Err(DriverError::UniqueViolation {
                    table: name.to_owned(),
                    detail: format!("{}={new_pk}", table.pk),
                });
            }
            changes.push((pk, new_pk, StoredRow { seq: stored.seq, data }));
        }

        let mut out = Vec::with_capacity(changes.len());
        for (old_pk, new_pk, row) in changes {
            out.push(row.data.clone());
            if old_pk != new_pk {
                self.stage(name, old_pk, None);
            }
            self.stage(name, new_pk, Some(row));
        }
        Ok(out)
    }

    fn delete(
        &mut self,
        name: &str,
        table: &Table,
        filter: &Filter,
    ) -> Result<Vec<Row>, DriverError> {
        let removed = self.visible_matching(name, table, filter);
        for (pk, _) in &removed {
            if !self.lock_row(name, pk) {
                return Err(DriverError::WriteConflict {
                    table: name.to_owned(),
                });
            }
        }
        let mut out = Vec::with_capacity(removed.len());
        for (pk, row) in removed {
            out.push(row.data);
            self.stage(name, pk, None);
        }
        Ok(out)
    }

    fn apply_commit(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.engine.tables.write();
            for (name, overlay) in staged {
                let Some(table) = tables.get_mut(&name) else {
                    continue;
                };
                for (pk, row) in overlay {
                    match row {
                        Some(row) => {
                            table.rows.insert(pk, row);
                        }
                        None => {
                            table.rows.remove(&pk);
                        }
                    }
                }
            }
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.session.extend(self.pending_session.drain());
        }
    }
}

fn check_setting(key: &str) -> Result<(), DriverError> {
    if is_valid_setting(key) {
        Ok(())
    } else {
        Err(DriverError::InvalidSetting(key.to_owned()))
    }
}

#[async_trait]
impl StorageTransaction for MemoryTx {
    async fn set_local(&mut self, key: &str, value: &str) -> Result<(), DriverError> {
        check_setting(key)?;
        self.local.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn current_setting(&mut self, key: &str) -> Result<Option<String>, DriverError> {
        check_setting(key)?;
        Ok(self.setting(key).map(str::to_owned))
    }

    async fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, DriverError> {
        self.run(statement)
    }

    async fn commit(mut self) -> Result<(), DriverError> {
        self.apply_commit();
        Ok(())
    }

    async fn rollback(self) -> Result<(), DriverError> {
        drop(self);
        Ok(())
    }

    fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(|c| c.id)
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release_locks();
        if let Some(mut conn) = self.conn.take() {
            // transaction-local values revert; the placeholder stays defined
            for key in self.local.keys() {
                conn.session.entry(key.clone()).or_default();
            }
            self.engine.idle.lock().push(conn);
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryEngine {
    async fn install_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(policy.table())
            .ok_or_else(|| DriverError::UnknownTable(policy.table().to_owned()))?;
        table.row_security = true;
        table.policy = Some(RowPolicy {
            name: policy.name().to_owned(),
            tenant_col: policy.tenant_col().to_owned(),
            tenant_setting: policy.tenant_setting().to_owned(),
            bypass_setting: policy.bypass_setting().to_owned(),
        });
        Ok(())
    }

    async fn drop_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError> {
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(policy.table())
            .ok_or_else(|| DriverError::UnknownTable(policy.table().to_owned()))?;
        if table
            .policy
            .as_ref()
            .is_some_and(|p| p.name == policy.name())
        {
            table.policy = None;
        }
        table.row_security = false;
        Ok(())
    }

    async fn policy_status(&self, policy: &IsolationPolicy) -> Result<PolicyStatus, DriverError> {
        let tables = self.inner.tables.read();
        let table = tables
            .get(policy.table())
            .ok_or_else(|| DriverError::UnknownTable(policy.table().to_owned()))?;
        Ok(PolicyStatus {
            row_security_enabled: table.row_security,
            // there is no table owner here, so row security is always forced
            forced: table.row_security,
            policy_present: table
                .policy
                .as_ref()
                .is_some_and(|p| p.name == policy.name()),
        })
    }
}
