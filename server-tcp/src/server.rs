use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use shared::Result;
use shared_tcp::{Frame, RespCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use storage_engine::Keyspace;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Open/peak/total connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
}

impl ConnectionStats {
    fn opened(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

// Decrements the open-connection count however the connection task ends
struct ConnectionGuard<'a>(&'a ConnectionStats);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.closed();
    }
}

/// State shared by every connection the server accepts.
#[derive(Debug)]
pub struct ServerState {
    keyspace: Keyspace,
    password: Option<String>,
    stats: ConnectionStats,
    disconnect: watch::Sender<u64>,
}

impl ServerState {
    pub fn new(password: Option<String>) -> Self {
        let (disconnect, _) = watch::channel(0);
        Self {
            keyspace: Keyspace::default(),
            password,
            stats: ConnectionStats::default(),
            disconnect,
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Close every connection currently open, as if the server had dropped them.
    pub fn disconnect_clients(&self) {
        self.disconnect.send_modify(|generation| *generation += 1);
    }
}

// Per-connection state
struct Session {
    db: usize,
    authenticated: bool,
    closing: bool,
}

/// A server running on a background task. Aborted when dropped.
#[derive(Debug)]
pub struct RunningServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Bind `addr` and serve on a spawned task.
pub async fn start(addr: &str, state: ServerState) -> std::io::Result<RunningServer> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let state = Arc::new(state);
    let serve_state = state.clone();

    let handle = tokio::spawn(async move {
        if let Err(err) = serve(listener, serve_state).await {
            warn!("Server on {addr} stopped: {err}");
        }
    });

    Ok(RunningServer { addr, state, handle })
}

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        socket.set_nodelay(true).ok();
        let state = state.clone();
        tokio::spawn(async move {
            info!("Connection {addr} successful.");

            if let Err(err) = process_connection(socket, state).await {
                warn!("Connection {addr} error: {err}");
            }
            debug!("Connection {addr} closed.");
        });
    }
}

/// Serve one client over any byte stream, plain TCP or an already
/// negotiated TLS session.
pub async fn process_connection<S>(socket: S, state: Arc<ServerState>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    state.stats.opened();
    let _guard = ConnectionGuard(&state.stats);

    let mut disconnect = state.disconnect.subscribe();
    let mut framed = Framed::new(socket, RespCodec::new());
    let mut session = Session {
        db: 0,
        authenticated: state.password.is_none(),
        closing: false,
    };

    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = disconnect.changed() => {
                debug!("Dropping connection on request");
                return Ok(());
            }
        };

        let Some(frame_result) = frame else {
            return Ok(());
        };

        let request = match frame_result.and_then(Frame::into_command) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("Failed to decode request: {}", e);
                framed.send(Frame::error(format!("ERR {e}"))).await?;
                // The stream position is unknown after a framing error
                return Ok(());
            }
        };

        let response = execute(&state, &mut session, request);
        framed.send(response).await?;

        if session.closing {
            return Ok(());
        }
    }
}

fn execute(state: &ServerState, session: &mut Session, parts: Vec<Bytes>) -> Frame {
    let verb = String::from_utf8_lossy(&parts[0]).to_ascii_uppercase();
    let args = &parts[1..];

    if !session.authenticated && verb != "AUTH" && verb != "QUIT" {
        return Frame::error("NOAUTH Authentication required.");
    }

    let keyspace = &state.keyspace;
    let db = session.db;

    let result = match (verb.as_str(), args) {
        ("PING", []) => Ok(Frame::Simple("PONG".to_string())),
        ("PING", [msg]) | ("ECHO", [msg]) => Ok(Frame::Bulk(msg.clone())),
        ("QUIT", []) => {
            session.closing = true;
            Ok(Frame::ok())
        }
        ("AUTH", [password]) => Ok(authenticate(state, session, password)),
        ("SELECT", [index]) => Ok(select(state, session, index)),
        ("GET", [key]) => keyspace.get(db, key).map(bulk_or_null),
        ("SET", [key, value]) => keyspace
            .set(db, key.clone(), value.clone())
            .map(|_| Frame::ok()),
        ("GETSET", [key, value]) => keyspace
            .getset(db, key.clone(), value.clone())
            .map(bulk_or_null),
        ("DEL", keys) if !keys.is_empty() => keyspace.delete(db, keys).map(Frame::Integer),
        ("EXISTS", keys) if !keys.is_empty() => keyspace.exists(db, keys).map(Frame::Integer),
        ("INCRBY", [key, delta]) => parse_i64(delta)
            .and_then(|delta| keyspace.incr_by(db, key.clone(), delta))
            .map(Frame::Integer),
        ("HSET", [key, rest @ ..]) if !rest.is_empty() && rest.len() % 2 == 0 => {
            let pairs = rest
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            keyspace.hset(db, key.clone(), pairs).map(Frame::Integer)
        }
        ("HGET", [key, field]) => keyspace.hget(db, key, field).map(bulk_or_null),
        ("DBSIZE", []) => keyspace.dbsize(db).map(|n| Frame::Integer(n as i64)),
        ("KEYS", [pattern]) => keyspace
            .keys(db, pattern)
            .map(|keys| Frame::Array(keys.into_iter().map(Frame::Bulk).collect())),
        ("FLUSHDB", []) => keyspace.flush(db).map(|_| Frame::ok()),
        ("INFO", _) => Ok(Frame::Bulk(Bytes::from(info(state)))),
        (
            "PING" | "ECHO" | "QUIT" | "AUTH" | "SELECT" | "GET" | "SET" | "GETSET" | "DEL"
            | "EXISTS" | "INCRBY" | "HSET" | "HGET" | "DBSIZE" | "KEYS" | "FLUSHDB",
            _,
        ) => Ok(Frame::error(format!(
            "ERR wrong number of arguments for '{}' command",
            verb.to_ascii_lowercase()
        ))),
        _ => Ok(Frame::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&parts[0])
        ))),
    };

    result.unwrap_or_else(|e| Frame::error(e.to_string()))
}

fn authenticate(state: &ServerState, session: &mut Session, password: &Bytes) -> Frame {
    match &state.password {
        None => Frame::error(
            "ERR AUTH <password> called without any password configured for the default user.",
        ),
        Some(expected) if expected.as_bytes() == &password[..] => {
            session.authenticated = true;
            Frame::ok()
        }
        Some(_) => Frame::error("WRONGPASS invalid username-password pair or user is disabled."),
    }
}

fn select(state: &ServerState, session: &mut Session, index: &Bytes) -> Frame {
    match std::str::from_utf8(index).ok().and_then(|s| s.parse::<usize>().ok()) {
        Some(db) if db < state.keyspace.databases() => {
            session.db = db;
            Frame::ok()
        }
        Some(_) => Frame::error("ERR DB index is out of range"),
        None => Frame::error("ERR value is not an integer or out of range"),
    }
}

fn info(state: &ServerState) -> String {
    format!(
        "# Clients\r\nconnected_clients:{}\r\npeak_clients:{}\r\ntotal_connections_received:{}\r\n",
        state.stats.current(),
        state.stats.peak(),
        state.stats.total()
    )
}

fn bulk_or_null(value: Option<Bytes>) -> Frame {
    value.map(Frame::Bulk).unwrap_or(Frame::Null)
}

fn parse_i64(raw: &Bytes) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(shared::Error::NotAnInteger)
}
