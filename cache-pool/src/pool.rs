use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use shared::config::CacheConfig;
use shared::{Error, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use crate::connection::{Connection, Connector};

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Open connections waiting in the idle set.
    pub idle: usize,
    /// Connections opened over the pool's lifetime.
    pub created: u64,
    /// Acquisitions that found the pool exhausted and had to wait.
    pub waits: u64,
}

/// A bounded pool of connections to one cache server.
///
/// At most `max_connections` connections are open or checked out at any
/// time. When all of them are in use, [`ConnectionPool::get`] waits for one
/// to be returned; there is no timeout unless the caller asks for one with
/// [`ConnectionPool::get_timeout`].
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    connector: Connector,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
    max_connections: usize,
    next_id: AtomicU64,
    created: AtomicU64,
    waits: AtomicU64,
}

impl ConnectionPool {
    /// Build a pool for `config`. Connections are opened lazily, so an
    /// unreachable server is only reported by the first operation.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let max_connections = config.max_connections;
        if max_connections > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "max_connections must be at most {}, got {max_connections}",
                Semaphore::MAX_PERMITS
            )));
        }
        let connector = Connector::new(config)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                connector,
                permits: Arc::new(Semaphore::new(max_connections)),
                idle: Mutex::new(Vec::new()),
                max_connections,
                next_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                waits: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        self.inner.connector.config()
    }

    /// Check out a connection, waiting as long as it takes for one to free up.
    pub async fn get(&self) -> Result<PooledConnection> {
        let permit = self.acquire_permit().await?;
        self.checkout(permit).await
    }

    /// Like [`get`](Self::get) but gives up with [`Error::PoolTimeout`] after
    /// `timeout`. Opening a new connection counts against the same deadline.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| Error::PoolTimeout)?
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            max_connections: inner.max_connections,
            in_use: inner
                .max_connections
                .saturating_sub(inner.permits.available_permits()),
            idle: inner.idle.lock().len(),
            created: inner.created.load(Ordering::Relaxed),
            waits: inner.waits.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out connections and drop the idle ones. Connections that
    /// are checked out are closed when returned.
    pub fn close(&self) {
        self.inner.permits.close();
        let drained = std::mem::take(&mut *self.inner.idle.lock());
        debug!(closed = drained.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        match self.inner.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::Closed) => Err(Error::PoolClosed),
            Err(TryAcquireError::NoPermits) => {
                self.inner.waits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    max = self.inner.max_connections,
                    "Connection pool exhausted, waiting"
                );
                self.inner
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::PoolClosed)
            }
        }
    }

    // Only a permit holder gets here, and a new connection is opened only
    // when the idle set is empty, so open connections never exceed the
    // number of permits.
    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection> {
        let health_check = self.config().health_check_interval;

        loop {
            let candidate = self.inner.idle.lock().pop();
            let Some(mut conn) = candidate else {
                break;
            };

            if health_check.is_zero() || conn.idle_for() < health_check {
                debug!(id = conn.id(), "Reusing idle connection");
                return Ok(self.wrap(conn, permit));
            }

            match conn.ping().await {
                Ok(()) => return Ok(self.wrap(conn, permit)),
                Err(err) => debug!(id = conn.id(), "Discarding connection after failed health check: {err}"),
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = self.inner.connector.connect(id).await?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        Ok(self.wrap(conn, permit))
    }

    fn wrap(&self, conn: Connection, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connector", &self.inner.connector)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection. Returned to the pool on drop unless it broke
/// while in use.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    // Released after `Drop::drop` has put the connection back
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if conn.is_broken() {
            debug!(id = conn.id(), "Discarding broken connection");
        } else if !self.pool.permits.is_closed() {
            self.pool.idle.lock().push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use server_tcp::{RunningServer, ServerState, start};
    use shared_tcp::Frame;

    async fn server() -> RunningServer {
        start("127.0.0.1:0", ServerState::new(None)).await.unwrap()
    }

    fn pool_for(server: &RunningServer, max: usize) -> ConnectionPool {
        let mut config = CacheConfig::new("127.0.0.1", server.addr().port());
        config.max_connections = max;
        ConnectionPool::new(config).unwrap()
    }

    #[test]
    fn test_max_connections_beyond_permit_limit_rejected() {
        let mut config = CacheConfig::new("127.0.0.1", 6379);
        config.max_connections = usize::MAX >> 2;
        assert!(matches!(ConnectionPool::new(config), Err(Error::Config(_))));

        // Large but representable bounds cost nothing up front
        let mut config = CacheConfig::new("127.0.0.1", 6379);
        config.max_connections = Semaphore::MAX_PERMITS;
        let pool = ConnectionPool::new(config).unwrap();
        assert_eq!(pool.stats().max_connections, Semaphore::MAX_PERMITS);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_lazy_and_reused() {
        let server = server().await;
        let pool = pool_for(&server, 4);
        assert_eq!(pool.stats().created, 0);
        assert_eq!(server.state().stats().total(), 0);

        {
            let mut conn = pool.get().await.unwrap();
            conn.ping().await.unwrap();
            assert_eq!(pool.stats().in_use, 1);
        }
        {
            let mut conn = pool.get().await.unwrap();
            conn.ping().await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_timeout_when_exhausted() {
        let server = server().await;
        let pool = pool_for(&server, 1);

        let held = pool.get().await.unwrap();
        let result = pool.get_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::PoolTimeout)));
        assert_eq!(pool.stats().waits, 1);

        drop(held);
        assert!(pool.get_timeout(Duration::from_millis(500)).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let server = server().await;
        let pool = pool_for(&server, 1);

        let held = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let held_id = held.id();
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    }

    #[tokio::test]
    async fn test_broken_connection_discarded() {
        let server = server().await;
        let pool = pool_for(&server, 2);

        {
            let mut conn = pool.get().await.unwrap();
            conn.ping().await.unwrap();
        }
        server.state().disconnect_clients();
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let mut conn = pool.get().await.unwrap();
            assert!(conn.ping().await.is_err());
        }
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().in_use, 0);

        let mut conn = pool.get().await.unwrap();
        conn.ping().await.unwrap();
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test]
    async fn test_health_check_replaces_dead_idle_connection() {
        let server = server().await;
        let mut config = CacheConfig::new("127.0.0.1", server.addr().port());
        config.health_check_interval = Duration::from_millis(1);
        let pool = ConnectionPool::new(config).unwrap();

        drop(pool.get().await.unwrap());
        server.state().disconnect_clients();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The stale connection fails its probe and a new one is opened
        let mut conn = pool.get().await.unwrap();
        let reply = conn
            .request(Frame::command([Bytes::from_static(b"ECHO"), Bytes::from_static(b"hi")]))
            .await
            .unwrap();
        assert_eq!(reply, Frame::Bulk(Bytes::from_static(b"hi")));
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test]
    async fn test_cancelled_request_not_reused() {
        let server = server().await;
        let pool = pool_for(&server, 1);

        let mut conn = pool.get().await.unwrap();
        {
            let request = conn.request(Frame::command([Bytes::from_static(b"PING")]));
            // Polled once and then abandoned
            let _ = tokio::time::timeout(Duration::ZERO, request).await;
        }
        let reusable = !conn.is_broken();
        drop(conn);

        assert_eq!(pool.stats().idle, usize::from(reusable));
    }

    #[tokio::test]
    async fn test_close() {
        let server = server().await;
        let pool = pool_for(&server, 2);
        let held = pool.get().await.unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.get().await, Err(Error::PoolClosed)));

        drop(held);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_permit() {
        // Nothing listens on this port once the server is gone
        let port = {
            let server = server().await;
            server.addr().port()
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut config = CacheConfig::new("127.0.0.1", port);
        config.max_connections = 1;
        let pool = ConnectionPool::new(config).unwrap();

        assert!(pool.get().await.is_err());
        assert_eq!(pool.stats().in_use, 0);
        assert!(pool.get().await.is_err());
    }
}
