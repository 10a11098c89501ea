// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls: {0}")]
    Tls(String),
    #[error("protocol: {0}")]
    Protocol(String),
    /// Error reply sent by the backend, passed through verbatim.
    #[error("{0}")]
    Backend(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(&'static str),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("connection pool closed")]
    PoolClosed,
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
