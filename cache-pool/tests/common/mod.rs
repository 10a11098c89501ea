#![allow(dead_code)]

use cache_pool::{CacheConfig, PoolManager};
use server_tcp::{RunningServer, ServerState, start};

pub async fn start_server(password: Option<&str>) -> RunningServer {
    start("127.0.0.1:0", ServerState::new(password.map(str::to_string)))
        .await
        .expect("bind test server")
}

pub fn config_for(server: &RunningServer) -> CacheConfig {
    CacheConfig::new("127.0.0.1", server.addr().port())
}

/// A manager of its own, so tests do not share the process-wide instance.
pub fn manager_for(server: &RunningServer, max_connections: usize) -> PoolManager {
    let mut config = config_for(server);
    config.max_connections = max_connections;
    PoolManager::from_config(config).expect("valid config")
}
