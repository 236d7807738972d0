//! Storage-side row-level isolation policies.
//!
//! The engine re-filters every statement with a predicate keyed on the
//! transaction-local settings bound by the scope manager:
//!
//! ```text
//! coalesce(current_setting('<bypass>', true), '') = 'on'
//!   OR t.<tenant_col>::text = nullif(current_setting('<tenant>', true), '')
//! ```
//!
//! With no binding the predicate is NULL, so nothing is visible or writable.
//! `nullif` also covers the empty string PostgreSQL reports for a setting that
//! was defined earlier in the session and has since been reset.

use async_trait::async_trait;
use tracing::info;

use crate::config::PolicyConfig;
use crate::error::{DbError, DriverError};
use crate::query::is_valid_ident;
use crate::repo::ScopableEntity;

/// Isolation policy for one tenant-owned table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsolationPolicy {
    table: String,
    tenant_col: String,
    name: String,
    tenant_setting: String,
    bypass_setting: String,
}

impl IsolationPolicy {
    /// Policy for the table an entity declares.
    ///
    /// # Errors
    /// See [`Self::for_table`].
    pub fn for_entity<E: ScopableEntity>(cfg: &PolicyConfig) -> Result<Self, DbError> {
        Self::for_table(E::TABLE, E::tenant_col(), cfg)
    }

    /// Setting names end up as string literals in the policy DDL, so they are
    /// validated here along with the identifiers.
    ///
    /// # Errors
    /// [`DbError::InvalidConfig`] for a malformed table, column or setting name.
    pub fn for_table(table: &str, tenant_col: &str, cfg: &PolicyConfig) -> Result<Self, DbError> {
        cfg.validate()?;
        for (what, name) in [("table", table), ("tenant column", tenant_col)] {
            if !is_valid_ident(name) {
                return Err(DbError::InvalidConfig(format!(
                    "{what} '{name}' is not a valid identifier"
                )));
            }
        }
        Ok(Self {
            table: table.to_owned(),
            tenant_col: tenant_col.to_owned(),
            name: cfg.policy_name.clone(),
            tenant_setting: cfg.tenant_setting.clone(),
            bypass_setting: cfg.bypass_setting.clone(),
        })
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn tenant_col(&self) -> &str {
        &self.tenant_col
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tenant_setting(&self) -> &str {
        &self.tenant_setting
    }

    #[must_use]
    pub fn bypass_setting(&self) -> &str {
        &self.bypass_setting
    }

    /// The `USING` / `WITH CHECK` predicate.
    #[must_use]
    pub fn predicate_sql(&self) -> String {
        format!(
            "coalesce(current_setting('{bypass}', true), '') = 'on' OR {table}.{col}::text = nullif(current_setting('{tenant}', true), '')",
            bypass = self.bypass_setting,
            tenant = self.tenant_setting,
            table = quote_ident(&self.table),
            col = quote_ident(&self.tenant_col),
        )
    }

    /// DDL statements that install the policy, in execution order.
    #[must_use]
    pub fn install_statements(&self) -> Vec<String> {
        let table = quote_ident(&self.table);
        let name = quote_ident(&self.name);
        let pred = self.predicate_sql();
        vec![
            format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY"),
            format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY"),
            format!("DROP POLICY IF EXISTS {name} ON {table}"),
            format!(
                "CREATE POLICY {name} ON {table} AS PERMISSIVE FOR ALL USING ({pred}) WITH CHECK ({pred})"
            ),
        ]
    }

    /// DDL statements that remove the policy and disable row security.
    #[must_use]
    pub fn drop_statements(&self) -> Vec<String> {
        let table = quote_ident(&self.table);
        let name = quote_ident(&self.name);
        vec![
            format!("DROP POLICY IF EXISTS {name} ON {table}"),
            format!("ALTER TABLE {table} NO FORCE ROW LEVEL SECURITY"),
            format!("ALTER TABLE {table} DISABLE ROW LEVEL SECURITY"),
        ]
    }

    /// Install script as one SQL text, for migrations.
    #[must_use]
    pub fn to_sql(&self) -> String {
        join_script(&self.install_statements())
    }

    /// Downgrade script as one SQL text, for migrations.
    #[must_use]
    pub fn drop_sql(&self) -> String {
        join_script(&self.drop_statements())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn join_script(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{s};"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Observed enforcement state of a table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolicyStatus {
    pub row_security_enabled: bool,
    pub forced: bool,
    pub policy_present: bool,
}

impl PolicyStatus {
    /// Enabled, forced even for the table owner, and the named policy exists.
    #[must_use]
    pub fn is_enforced(self) -> bool {
        self.row_security_enabled && self.forced && self.policy_present
    }
}

/// Engines that can install and report isolation policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// # Errors
    /// Returns a driver error when the table is unknown or DDL fails.
    async fn install_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError>;

    /// # Errors
    /// Returns a driver error when the table is unknown or DDL fails.
    async fn drop_policy(&self, policy: &IsolationPolicy) -> Result<(), DriverError>;

    /// # Errors
    /// Returns [`DriverError::UnknownTable`] when the table does not exist.
    async fn policy_status(&self, policy: &IsolationPolicy) -> Result<PolicyStatus, DriverError>;
}

/// Install every policy.
///
/// # Errors
/// Returns the first driver failure.
pub async fn install_policies<S>(store: &S, policies: &[IsolationPolicy]) -> Result<(), DbError>
where
    S: PolicyStore + ?Sized,
{
    for policy in policies {
        store.install_policy(policy).await?;
        info!(
            table = policy.table(),
            policy = policy.name(),
            "installed tenant isolation policy"
        );
    }
    Ok(())
}

/// Startup check: fail unless every protected table is enforced.
///
/// # Errors
/// [`DbError::PolicyNotEnforced`] for the first table that is not enforced,
/// or a driver error when the status cannot be read.
pub async fn verify_policies<S>(store: &S, policies: &[IsolationPolicy]) -> Result<(), DbError>
where
    S: PolicyStore + ?Sized,
{
    for policy in policies {
        let status = store.policy_status(policy).await?;
        if !status.is_enforced() {
            tracing::error!(
                table = policy.table(),
                policy = policy.name(),
                row_security_enabled = status.row_security_enabled,
                forced = status.forced,
                policy_present = status.policy_present,
                "tenant isolation policy not enforced"
            );
            return Err(DbError::PolicyNotEnforced {
                table: policy.table().to_owned(),
                policy: policy.name().to_owned(),
                status,
            });
        }
    }
    Ok(())
}
