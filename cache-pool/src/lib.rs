//! Multi-tenant, connection-pooled cache client.
//!
//! A single [`PoolManager`] per process owns one bounded pool of connections
//! to a RESP cache server. Clients obtained from it either send commands as
//! given or, when created for a tenant, prefix the key of every key-bearing
//! operation with `tenant:` so tenants sharing the server cannot see each
//! other's entries through those operations.
//!
//! ```no_run
//! use cache_pool::{KeyValue, get_cache_client};
//!
//! # async fn run() -> cache_pool::Result<()> {
//! let client = get_cache_client(Some("acme"))?;
//! client.set("user:1", "alice").await?; // stored as "acme:user:1"
//! let _name = client.get("user:1").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod command;
pub mod connection;
pub mod key;
pub mod manager;
pub mod pool;
pub mod tenant_context;
pub mod tls;

pub use client::{Client, KeyValue, PooledClient, TenantClient};
pub use command::{Command, KeyOperation};
pub use connection::{Connection, Connector};
pub use key::{Arg, Key, NAMESPACE_SEPARATOR, TenantId};
pub use manager::{PoolManager, Singleton};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};

pub use shared::config::{CacheConfig, CertReqs, KeepaliveConfig, TlsConfig};
pub use shared::{Error, Result};
pub use shared_tcp::{Bytes, Frame};

/// Client over the process-wide pool, scoped to `tenant` when one is given.
pub fn get_cache_client(tenant: Option<&str>) -> Result<Client> {
    PoolManager::instance()?.get_client(tenant)
}
