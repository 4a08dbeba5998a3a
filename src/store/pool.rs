//! Shared connection pool construction for every store in this module.
//!
//! One pool per engine instance, sized from [`crate::config::EngineConfig`].
//! Stores borrow `&DbPool`; none of them own a pool themselves, so a single
//! engine can share one pool across the fields/documents/templates/
//! transcripts stores the way a single connection-pooled HTTP client is
//! shared across the LLM client's callers (spec §9 "one connection pool
//! owned by the LLM client with bounded concurrency" — the same principle
//! applied to the database side).

use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::NoTls;

use crate::error::EngineError;

pub type DbPool = Pool;

/// Build a pool from a `postgres://` connection string. `max_size` bounds
/// in-flight connections the way `max_workers` bounds in-flight LLM calls
/// (spec §5 "backpressure").
pub fn build_pool(database_url: &str, max_size: usize) -> Result<DbPool, EngineError> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_size.max(1)));
    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| EngineError::PoolError(e.to_string()))
}
