use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use shared::{Error, Result};
use shared_tcp::Frame;
use tracing::trace;

use crate::command::{Command, KeyOperation};
use crate::key::{Arg, Key, TenantId};
use crate::pool::ConnectionPool;

/// Cache operations shared by plain and tenant-scoped clients.
///
/// Every typed operation is built on [`execute`](KeyValue::execute), so an
/// implementation that rewrites commands there applies to all of them.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Run an arbitrary command and return the raw reply. Server error
    /// replies become [`Error::Backend`].
    async fn execute(&self, command: Command) -> Result<Frame>;

    async fn get<K>(&self, key: K) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
    {
        let reply = self.execute(Command::for_key(KeyOperation::Get, key.into())).await?;
        optional_bytes(reply)
    }

    async fn set<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: Into<Key> + Send,
        V: Into<Arg> + Send,
    {
        let command = Command::for_key(KeyOperation::Set, key.into()).arg(value);
        expect_ok(self.execute(command).await?)
    }

    /// Returns whether the key existed.
    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: Into<Key> + Send,
    {
        let reply = self.execute(Command::for_key(KeyOperation::Delete, key.into())).await?;
        Ok(integer(reply)? > 0)
    }

    async fn exists<K>(&self, key: K) -> Result<bool>
    where
        K: Into<Key> + Send,
    {
        let reply = self.execute(Command::for_key(KeyOperation::Exists, key.into())).await?;
        Ok(integer(reply)? > 0)
    }

    /// Add `delta` to the counter at `key`, returning the new value.
    async fn incr_by<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: Into<Key> + Send,
    {
        let command = Command::for_key(KeyOperation::IncrBy, key.into()).arg(delta);
        integer(self.execute(command).await?)
    }

    /// Returns whether `field` was newly created.
    async fn hset<K, F, V>(&self, key: K, field: F, value: V) -> Result<bool>
    where
        K: Into<Key> + Send,
        F: Into<Arg> + Send,
        V: Into<Arg> + Send,
    {
        let command = Command::for_key(KeyOperation::HSet, key.into())
            .arg(field)
            .arg(value);
        Ok(integer(self.execute(command).await?)? > 0)
    }

    async fn hget<K, F>(&self, key: K, field: F) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
        F: Into<Arg> + Send,
    {
        let command = Command::for_key(KeyOperation::HGet, key.into()).arg(field);
        optional_bytes(self.execute(command).await?)
    }

    /// Store `value` and return what was there before.
    async fn getset<K, V>(&self, key: K, value: V) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
        V: Into<Arg> + Send,
    {
        let command = Command::for_key(KeyOperation::GetSet, key.into()).arg(value);
        optional_bytes(self.execute(command).await?)
    }
}

/// Client bound to a connection pool, sending commands as given.
#[derive(Debug, Clone)]
pub struct PooledClient {
    pool: ConnectionPool,
    acquire_timeout: Option<Duration>,
}

impl PooledClient {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            acquire_timeout: None,
        }
    }

    /// Fail with [`Error::PoolTimeout`] instead of waiting indefinitely for a
    /// free connection.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[async_trait]
impl KeyValue for PooledClient {
    async fn execute(&self, command: Command) -> Result<Frame> {
        let mut conn = match self.acquire_timeout {
            Some(timeout) => self.pool.get_timeout(timeout).await?,
            None => self.pool.get().await?,
        };
        trace!(conn = conn.id(), verb = command.verb(), "Executing command");

        match conn.request(command.to_frame()).await? {
            Frame::Error(msg) => Err(Error::Backend(msg)),
            reply => Ok(reply),
        }
    }
}

/// Client that confines the key-bearing operations to one tenant's
/// namespace.
///
/// `GET`, `SET`, `DEL`, `EXISTS`, `INCRBY`, `HSET`, `HGET` and `GETSET` have
/// their key rewritten to `tenant:key`. Everything else, including
/// `KEYS`, `DBSIZE` and `FLUSHDB`, goes to the server untouched and is not
/// confined to the tenant.
#[derive(Debug, Clone)]
pub struct TenantClient {
    tenant: TenantId,
    inner: PooledClient,
}

impl TenantClient {
    pub fn new(tenant: TenantId, inner: PooledClient) -> Self {
        Self { tenant, inner }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant
    }

    /// The underlying client, which does no key rewriting.
    pub fn unscoped(&self) -> &PooledClient {
        &self.inner
    }

    fn scoped(&self, key: impl Into<Key>) -> Key {
        self.tenant.namespace(key.into())
    }
}

#[async_trait]
impl KeyValue for TenantClient {
    async fn execute(&self, command: Command) -> Result<Frame> {
        // Rejects bad keys before a connection is taken from the pool
        let command = command.namespaced(&self.tenant)?;
        self.inner.execute(command).await
    }

    async fn get<K>(&self, key: K) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
    {
        self.inner.get(self.scoped(key)).await
    }

    async fn set<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: Into<Key> + Send,
        V: Into<Arg> + Send,
    {
        self.inner.set(self.scoped(key), value).await
    }

    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: Into<Key> + Send,
    {
        self.inner.delete(self.scoped(key)).await
    }

    async fn exists<K>(&self, key: K) -> Result<bool>
    where
        K: Into<Key> + Send,
    {
        self.inner.exists(self.scoped(key)).await
    }

    async fn incr_by<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: Into<Key> + Send,
    {
        self.inner.incr_by(self.scoped(key), delta).await
    }

    async fn hset<K, F, V>(&self, key: K, field: F, value: V) -> Result<bool>
    where
        K: Into<Key> + Send,
        F: Into<Arg> + Send,
        V: Into<Arg> + Send,
    {
        self.inner.hset(self.scoped(key), field, value).await
    }

    async fn hget<K, F>(&self, key: K, field: F) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
        F: Into<Arg> + Send,
    {
        self.inner.hget(self.scoped(key), field).await
    }

    async fn getset<K, V>(&self, key: K, value: V) -> Result<Option<Bytes>>
    where
        K: Into<Key> + Send,
        V: Into<Arg> + Send,
    {
        self.inner.getset(self.scoped(key), value).await
    }
}

/// The client handed out by [`crate::PoolManager::get_client`].
#[derive(Debug, Clone)]
pub enum Client {
    Plain(PooledClient),
    Tenant(TenantClient),
}

impl Client {
    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Client::Plain(_) => None,
            Client::Tenant(client) => Some(client.tenant_id()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        match self {
            Client::Plain(client) => client.pool(),
            Client::Tenant(client) => client.unscoped().pool(),
        }
    }

    pub fn with_acquire_timeout(self, timeout: Duration) -> Self {
        match self {
            Client::Plain(client) => Client::Plain(client.with_acquire_timeout(timeout)),
            Client::Tenant(TenantClient { tenant, inner }) => Client::Tenant(TenantClient {
                tenant,
                inner: inner.with_acquire_timeout(timeout),
            }),
        }
    }
}

#[async_trait]
impl KeyValue for Client {
    async fn execute(&self, command: Command) -> Result<Frame> {
        match self {
            Client::Plain(client) => client.execute(command).await,
            Client::Tenant(client) => client.execute(command).await,
        }
    }
}

fn optional_bytes(reply: Frame) -> Result<Option<Bytes>> {
    match reply {
        Frame::Null => Ok(None),
        Frame::Bulk(data) => Ok(Some(data)),
        Frame::Simple(text) => Ok(Some(Bytes::from(text))),
        other => Err(Error::UnexpectedReply(format!("{other:?}"))),
    }
}

fn expect_ok(reply: Frame) -> Result<()> {
    match reply {
        Frame::Simple(text) if text == "OK" => Ok(()),
        other => Err(Error::UnexpectedReply(format!("{other:?}"))),
    }
}

fn integer(reply: Frame) -> Result<i64> {
    match reply {
        Frame::Integer(n) => Ok(n),
        other => Err(Error::UnexpectedReply(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::CacheConfig;

    #[test]
    fn test_reply_conversions() {
        assert_eq!(optional_bytes(Frame::Null).unwrap(), None);
        assert_eq!(
            optional_bytes(Frame::Bulk(Bytes::from_static(b"v"))).unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        assert!(matches!(
            optional_bytes(Frame::Integer(1)),
            Err(Error::UnexpectedReply(_))
        ));
        assert!(expect_ok(Frame::ok()).is_ok());
        assert!(expect_ok(Frame::Simple("QUEUED".to_string())).is_err());
        assert_eq!(integer(Frame::Integer(-3)).unwrap(), -3);
    }

    #[tokio::test]
    async fn test_bad_key_never_reaches_pool() {
        // Port 1 is never dialled: the command fails before checkout
        let pool = ConnectionPool::new(CacheConfig::new("127.0.0.1", 1)).unwrap();
        let client = TenantClient::new(TenantId::new("t").unwrap(), PooledClient::new(pool.clone()));

        let result = client.execute(Command::new("GET").arg(7i64)).await;
        assert!(matches!(result, Err(Error::UnsupportedKeyType("integer"))));
        assert_eq!(pool.stats().created, 0);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_client_variants() {
        let pool = ConnectionPool::new(CacheConfig::new("127.0.0.1", 6379)).unwrap();
        let plain = Client::Plain(PooledClient::new(pool.clone()));
        assert!(plain.tenant_id().is_none());

        let tenant = Client::Tenant(TenantClient::new(
            TenantId::new("acme").unwrap(),
            PooledClient::new(pool),
        ))
        .with_acquire_timeout(Duration::from_secs(1));
        assert_eq!(tenant.tenant_id().map(TenantId::as_str), Some("acme"));
    }
}
