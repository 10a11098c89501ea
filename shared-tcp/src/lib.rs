pub mod protocol;

pub use protocol::{Frame, RespCodec};

// Re-export Bytes for convenience
pub use bytes::Bytes;
