use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use shared::Result;
use shared::config::CacheConfig;
use tracing::info;

use crate::client::{Client, PooledClient, TenantClient};
use crate::key::TenantId;
use crate::pool::ConnectionPool;

/// Lazily constructed, process-wide value.
///
/// Reads after initialisation are a lock-free load. Construction is
/// serialised by a separate mutex and re-checks the slot, so concurrent first
/// callers build exactly one value and all receive the same `Arc`.
pub struct Singleton<T> {
    slot: ArcSwapOption<T>,
    init: Mutex<()>,
}

impl<T> Singleton<T> {
    pub const fn new() -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
            init: parking_lot::const_mutex(()),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Return the value, building it with `init` on first use. A failed
    /// `init` leaves the slot empty so a later call can try again.
    pub fn get_or_try_init<F, E>(&self, init: F) -> std::result::Result<Arc<T>, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _guard = self.init.lock();
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let value = Arc::new(init()?);
        self.slot.store(Some(value.clone()));
        Ok(value)
    }

    /// Empty the slot, returning the previous value. Holders of the old
    /// `Arc` keep it alive.
    pub fn reset(&self) -> Option<Arc<T>> {
        let _guard = self.init.lock();
        self.slot.swap(None)
    }
}

impl<T> Default for Singleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

static INSTANCE: Singleton<PoolManager> = Singleton::new();

/// Owner of the process-wide connection pool.
///
/// Every client handed out, plain or tenant-scoped, borrows connections from
/// the same bounded pool.
#[derive(Debug)]
pub struct PoolManager {
    pool: ConnectionPool,
}

impl PoolManager {
    /// The process-wide manager, configured from the environment (and a
    /// `.env` file, if present) on first use.
    pub fn instance() -> Result<Arc<PoolManager>> {
        INSTANCE.get_or_try_init(|| {
            dotenvy::dotenv().ok();
            Self::from_config(CacheConfig::from_env())
        })
    }

    /// Like [`instance`](Self::instance) but with explicit settings. If the
    /// manager already exists it is returned as is and `config` is ignored.
    pub fn init(config: CacheConfig) -> Result<Arc<PoolManager>> {
        INSTANCE.get_or_try_init(|| Self::from_config(config))
    }

    /// A manager that is not registered as the process-wide instance.
    pub fn from_config(config: CacheConfig) -> Result<PoolManager> {
        let pool = Self::create_pool(&config)?;
        info!(
            endpoint = %config.endpoint(),
            max_connections = config.max_connections,
            tls = config.tls.enabled,
            db = config.db,
            "Created cache connection pool"
        );
        Ok(PoolManager { pool })
    }

    /// Build a bounded, blocking pool for `config`.
    ///
    /// Checkouts beyond `max_connections` wait without a deadline.
    pub fn create_pool(config: &CacheConfig) -> Result<ConnectionPool> {
        ConnectionPool::new(config.clone())
    }

    /// A client over the shared pool. With a tenant id, the key-bearing
    /// operations are confined to that tenant's namespace.
    pub fn get_client(&self, tenant: Option<&str>) -> Result<Client> {
        let inner = PooledClient::new(self.pool.clone());
        match tenant {
            None => Ok(Client::Plain(inner)),
            Some(id) => Ok(Client::Tenant(TenantClient::new(TenantId::new(id)?, inner))),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &CacheConfig {
        self.pool.config()
    }

    /// Forget the process-wide manager so the next [`instance`](Self::instance)
    /// builds a fresh one. Clients already handed out keep working against
    /// the old pool.
    pub fn reset() {
        if INSTANCE.reset().is_some() {
            info!("Cache pool manager reset");
        }
    }
}
