use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use shared::config::{CacheConfig, KeepaliveConfig};
use shared::{Error, Result};
use shared_tcp::{Frame, RespCodec};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::tls;

/// Byte stream a connection runs over: plain TCP or TLS.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

type Transport = Framed<Box<dyn AsyncStream>, RespCodec>;

/// Opens and prepares backend connections for one configuration.
pub struct Connector {
    config: CacheConfig,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Connector {
    /// Validates `config` and prepares TLS material. No network I/O happens
    /// here.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let tls = if config.tls.enabled {
            Some((
                tls::build_connector(&config.tls)?,
                tls::server_name(&config.host)?,
            ))
        } else {
            None
        };

        Ok(Self { config, tls })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn connect(&self, id: u64) -> Result<Connection> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        stream.set_nodelay(true)?;
        apply_keepalive(&stream, &self.config.keepalive)?;

        let stream: Box<dyn AsyncStream> = match &self.tls {
            Some((connector, name)) => {
                let stream = connector
                    .connect(name.clone(), stream)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                Box::new(stream)
            }
            None => Box::new(stream),
        };

        let mut conn = Connection::new(id, Framed::new(stream, RespCodec::default()));

        if let Some(password) = &self.config.password {
            conn.expect_ok(Frame::command([
                Bytes::from_static(b"AUTH"),
                Bytes::from(password.clone()),
            ]))
            .await?;
        }
        if self.config.db != 0 {
            conn.expect_ok(Frame::command([
                Bytes::from_static(b"SELECT"),
                Bytes::from(self.config.db.to_string()),
            ]))
            .await?;
        }

        debug!(
            id,
            endpoint = %self.config.endpoint(),
            tls = self.tls.is_some(),
            db = self.config.db,
            "Opened cache connection"
        );
        Ok(conn)
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("endpoint", &self.config.endpoint())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

fn apply_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> std::io::Result<()> {
    let socket = SockRef::from(stream);

    if config.enabled {
        let keepalive = TcpKeepalive::new().with_time(config.idle);
        #[cfg(any(target_os = "linux", target_os = "macos", windows))]
        let keepalive = keepalive.with_interval(config.interval);
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let keepalive = keepalive.with_retries(config.probes);
        socket.set_tcp_keepalive(&keepalive)?;
    }

    #[cfg(target_os = "linux")]
    if let Some(timeout) = config.socket_timeout {
        socket.set_tcp_user_timeout(Some(timeout))?;
    }

    Ok(())
}

/// One open connection to the cache server.
pub struct Connection {
    id: u64,
    transport: Transport,
    last_used: Instant,
    // Set while a request is in flight. A request that errors or is
    // cancelled half way leaves it set and the pool drops the connection.
    broken: bool,
}

impl Connection {
    fn new(id: u64, transport: Transport) -> Self {
        Self {
            id,
            transport,
            last_used: Instant::now(),
            broken: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies from the server come back as `Ok(Frame::Error(..))`;
    /// only transport failures are errors here.
    pub async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.broken = true;

        self.transport.send(frame).await?;
        let reply = match self.transport.next().await {
            Some(reply) => reply?,
            None => return Err(Error::ConnectionClosed),
        };

        self.broken = false;
        self.last_used = Instant::now();
        Ok(reply)
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.request(Frame::command([Bytes::from_static(b"PING")])).await? {
            Frame::Simple(pong) if pong == "PONG" => Ok(()),
            Frame::Error(msg) => Err(Error::Backend(msg)),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn expect_ok(&mut self, frame: Frame) -> Result<()> {
        match self.request(frame).await? {
            Frame::Simple(ok) if ok == "OK" => Ok(()),
            Frame::Error(msg) => Err(Error::Backend(msg)),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("broken", &self.broken)
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use server_tcp::{ServerState, start};

    async fn server(password: Option<&str>) -> server_tcp::RunningServer {
        start("127.0.0.1:0", ServerState::new(password.map(str::to_string)))
            .await
            .unwrap()
    }

    fn config_for(server: &server_tcp::RunningServer) -> CacheConfig {
        CacheConfig::new("127.0.0.1", server.addr().port())
    }

    #[tokio::test]
    async fn test_connect_and_ping() {
        let server = server(None).await;
        let connector = Connector::new(config_for(&server)).unwrap();

        let mut conn = connector.connect(1).await.unwrap();
        conn.ping().await.unwrap();
        assert!(!conn.is_broken());
        assert_eq!(conn.id(), 1);
    }

    #[tokio::test]
    async fn test_auth_on_connect() {
        let server = server(Some("s3cret")).await;

        let mut config = config_for(&server);
        config.password = Some("wrong".to_string());
        let result = Connector::new(config.clone()).unwrap().connect(1).await;
        assert!(matches!(result, Err(Error::Backend(_))));

        config.password = Some("s3cret".to_string());
        let mut conn = Connector::new(config).unwrap().connect(2).await.unwrap();
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_keeps_connection() {
        let server = server(None).await;
        let mut conn = Connector::new(config_for(&server))
            .unwrap()
            .connect(1)
            .await
            .unwrap();

        let reply = conn
            .request(Frame::command([Bytes::from_static(b"NOSUCHCOMMAND")]))
            .await
            .unwrap();
        assert!(matches!(reply, Frame::Error(_)));
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_closed_by_server_marks_broken() {
        let server = server(None).await;
        let mut conn = Connector::new(config_for(&server))
            .unwrap()
            .connect(1)
            .await
            .unwrap();
        conn.ping().await.unwrap();

        server.state().disconnect_clients();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(conn.ping().await.is_err());
        assert!(conn.is_broken());
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut config = CacheConfig::new("127.0.0.1", 6379);
        config.max_connections = 0;
        assert!(matches!(Connector::new(config), Err(Error::Config(_))));
    }
}
