//! Applying [`DatabaseConfig`] to driver pool builders.

use crate::config::DatabaseConfig;

pub trait ApplyPoolOpts<T> {
    /// Apply the pool sizing and lifetime settings to the builder.
    #[must_use]
    fn apply(self, cfg: &DatabaseConfig) -> Self;
}

#[cfg(feature = "pg")]
impl ApplyPoolOpts<sea_orm::sqlx::postgres::PgPoolOptions>
    for sea_orm::sqlx::postgres::PgPoolOptions
{
    fn apply(mut self, cfg: &DatabaseConfig) -> Self {
        self = self
            .max_connections(cfg.max_conns)
            .min_connections(cfg.min_conns)
            .acquire_timeout(cfg.acquire_timeout)
            .idle_timeout(cfg.idle_timeout)
            .max_lifetime(cfg.max_lifetime);
        if cfg.test_before_acquire {
            self = self.test_before_acquire(true);
        }
        self
    }
}
