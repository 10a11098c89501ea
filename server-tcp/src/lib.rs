pub mod server;

pub use server::{ConnectionStats, RunningServer, ServerState, process_connection, serve, start};

// Re-export the wire types for convenience
pub use shared_tcp::{Bytes, Frame, RespCodec};
