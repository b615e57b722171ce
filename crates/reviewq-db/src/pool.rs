//! Connection pool sizing and health reporting.
//!
//! Every worker loop holds at most one connection while it runs a task, so
//! the pool is sized from the worker count plus room for request handlers.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use reviewq_core::{defaults, Error, Result};

/// Connections reserved for request handlers on top of the worker loops.
pub const REQUEST_HEADROOM: u32 = 6;

/// Seconds a caller waits for a free connection.
pub const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Seconds an unused connection stays open.
pub const IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workers(defaults::WORKER_COUNT)
    }
}

impl PoolConfig {
    /// Pool for `worker_count` loops plus [`REQUEST_HEADROOM`].
    pub fn for_workers(worker_count: usize) -> Self {
        let workers = u32::try_from(worker_count.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: workers.saturating_add(REQUEST_HEADROOM),
            min_connections: 1,
            acquire_timeout: Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }

    /// Size from `WORKER_COUNT`; `DATABASE_MAX_CONNECTIONS` overrides the
    /// total but never drops below one connection per worker plus one.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workers = lookup("WORKER_COUNT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_COUNT)
            .max(1);
        let mut config = Self::for_workers(workers);
        if let Some(requested) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse::<u32>().ok()) {
            let floor = u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1);
            if requested < floor {
                warn!(
                    subsystem = "db",
                    component = "pool",
                    requested,
                    workers,
                    using = floor,
                    "DATABASE_MAX_CONNECTIONS is below the worker count; raising it"
                );
            }
            config.max_connections = requested.max(floor);
        }
        config
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Open a PostgreSQL pool.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);
    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options.connect(database_url).await.map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool connected"
    );
    Ok(pool)
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl PoolHealth {
    /// Every connection is open and busy; the next acquire waits.
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.size >= self.max_connections
    }
}

/// Read and log pool usage. Saturation is logged at `warn`.
pub fn log_pool_metrics(pool: &PgPool) -> PoolHealth {
    let health = PoolHealth {
        size: pool.size(),
        idle: pool.num_idle(),
        max_connections: pool.options().get_max_connections(),
    };
    if health.is_saturated() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = health.size,
            max_connections = health.max_connections,
            "Connection pool saturated; requests are waiting for connections"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            pool_size = health.size,
            pool_idle = health.idle,
            max_connections = health.max_connections,
            "Pool usage"
        );
    }
    health
}
