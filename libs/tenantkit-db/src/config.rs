//! Configuration for the tenancy layer.
//!
//! Loaded with `figment` from the `tenancy` section of a YAML file, with
//! `TENANCY__`-prefixed environment variables layered on top
//! (`TENANCY__DATABASE__DSN`, `TENANCY__REPOSITORY__MAX_LIMIT`, ...).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;
use tenantkit_security::StaticDirectoryConfig;

use crate::error::DbError;
use crate::query::{is_valid_ident, is_valid_setting};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenancyConfig {
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub repository: RepositoryConfig,
    pub directory: StaticDirectoryConfig,
}

impl TenancyConfig {
    /// Extract and validate the `tenancy` section.
    ///
    /// # Errors
    /// Returns [`DbError::Figment`] when extraction fails and
    /// [`DbError::InvalidConfig`] when a value is out of range.
    pub fn from_figment(figment: &Figment) -> Result<Self, DbError> {
        // an absent section means every default applies
        let cfg: Self = if figment.contains("tenancy") {
            figment.extract_inner("tenancy").map_err(Box::new)?
        } else {
            Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an optional YAML file plus `TENANCY__*` environment variables.
    ///
    /// # Errors
    /// See [`Self::from_figment`].
    pub fn load(path: Option<&Path>) -> Result<Self, DbError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(
            Env::prefixed("TENANCY__")
                .split("__")
                .map(|key| format!("tenancy.{key}").into()),
        );
        Self::from_figment(&figment)
    }

    /// # Errors
    /// Returns [`DbError::InvalidConfig`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), DbError> {
        self.database.validate()?;
        self.policy.validate()?;
        self.repository.validate()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dsn: Option<String>,
    pub max_conns: u32,
    pub min_conns: u32,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Option<Duration>,
    pub test_before_acquire: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            max_conns: 30,
            min_conns: 0,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(3600)),
            test_before_acquire: true,
        }
    }
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), DbError> {
        if self.max_conns == 0 {
            return Err(DbError::InvalidConfig(
                "database.max_conns must be at least 1".to_owned(),
            ));
        }
        if self.min_conns > self.max_conns {
            return Err(DbError::InvalidConfig(
                "database.min_conns exceeds database.max_conns".to_owned(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DbError::InvalidConfig(
                "database.acquire_timeout must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dsn", &self.dsn.as_deref().map(redact_dsn))
            .field("max_conns", &self.max_conns)
            .field("min_conns", &self.min_conns)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("test_before_acquire", &self.test_before_acquire)
            .finish()
    }
}

/// Names of the transaction-local settings and the storage policy.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub tenant_setting: String,
    pub bypass_setting: String,
    pub policy_name: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            tenant_setting: "app.current_tenant".to_owned(),
            bypass_setting: "app.bypass_tenant".to_owned(),
            policy_name: "tenant_isolation".to_owned(),
        }
    }
}

impl PolicyConfig {
    /// # Errors
    /// Returns [`DbError::InvalidConfig`] for malformed or clashing names.
    pub fn validate(&self) -> Result<(), DbError> {
        for (field, value) in [
            ("policy.tenant_setting", &self.tenant_setting),
            ("policy.bypass_setting", &self.bypass_setting),
        ] {
            if !is_valid_setting(value) {
                return Err(DbError::InvalidConfig(format!(
                    "{field} must be a dotted identifier such as 'app.current_tenant', got '{value}'"
                )));
            }
        }
        if self.tenant_setting == self.bypass_setting {
            return Err(DbError::InvalidConfig(
                "policy.tenant_setting and policy.bypass_setting must differ".to_owned(),
            ));
        }
        if !is_valid_ident(&self.policy_name) {
            return Err(DbError::InvalidConfig(format!(
                "policy.policy_name '{}' is not a valid identifier",
                self.policy_name
            )));
        }
        Ok(())
    }
}

/// Row limits applied by repositories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 500,
        }
    }
}

impl RepositoryConfig {
    fn validate(self) -> Result<(), DbError> {
        if self.default_limit == 0 || self.max_limit == 0 {
            return Err(DbError::InvalidConfig(
                "repository limits must be at least 1".to_owned(),
            ));
        }
        if self.default_limit > self.max_limit {
            return Err(DbError::InvalidConfig(
                "repository.default_limit exceeds repository.max_limit".to_owned(),
            ));
        }
        Ok(())
    }

    /// Effective page size for a requested limit.
    #[must_use]
    pub fn clamp(self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

/// Mask the password of a DSN for logging.
#[must_use]
pub fn redact_dsn(dsn: &str) -> String {
    if !dsn.contains('@') {
        return dsn.to_owned();
    }
    match url::Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "***".to_owned();
            }
            parsed.to_string()
        }
        Err(_) => "***".to_owned(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn redacts_password() {
        assert_eq!(
            redact_dsn("postgres://app:hunter2@db:5432/app"),
            "postgres://app:***@db:5432/app"
        );
        assert_eq!(redact_dsn("postgres://db/app"), "postgres://db/app");
        assert_eq!(redact_dsn("not a url @ all"), "***");
    }

    #[test]
    fn clamp_applies_default_and_max() {
        let cfg = RepositoryConfig::default();
        assert_eq!(cfg.clamp(None), 100);
        assert_eq!(cfg.clamp(Some(20)), 20);
        assert_eq!(cfg.clamp(Some(10_000)), 500);
        assert_eq!(cfg.clamp(Some(0)), 1);
    }

    #[test]
    fn policy_names_are_validated() {
        assert!(PolicyConfig::default().validate().is_ok());
        let bad = PolicyConfig {
            tenant_setting: "current_tenant".to_owned(),
            ..PolicyConfig::default()
        };
        assert!(matches!(bad.validate(), Err(DbError::InvalidConfig(_))));
        let clash = PolicyConfig {
            bypass_setting: "app.current_tenant".to_owned(),
            ..PolicyConfig::default()
        };
        assert!(clash.validate().is_err());
    }

    #[test]
    #[allow(clippy::use_debug)]
    fn debug_hides_dsn_password() {
        let cfg = DatabaseConfig {
            dsn: Some("postgres://app:hunter2@db/app".to_owned()),
            ..DatabaseConfig::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
