//! Exercises the process-wide instance. Everything touching the global lives
//! in this single test so nothing else observes it mid-way.

mod common;

use std::sync::{Arc, Barrier};

use bytes::Bytes;
use cache_pool::{KeyValue, PoolManager, get_cache_client};
use common::{config_for, start_server};

#[test]
fn test_process_wide_manager() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(start_server(None));
    let config = config_for(&server);

    // Concurrent first use builds one manager
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = config.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                PoolManager::init(config).unwrap()
            })
        })
        .collect();
    let managers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));

    let first = managers[0].clone();
    assert!(Arc::ptr_eq(&first, &PoolManager::instance().unwrap()));

    // Clients from the accessor share the one pool
    let client = get_cache_client(Some("T")).unwrap();
    runtime.block_on(async {
        client.set("k", "v").await.unwrap();
    });
    assert_eq!(
        server.state().keyspace().get(0, b"T:k").unwrap(),
        Some(Bytes::from("v"))
    );
    assert_eq!(first.pool().stats().created, 1);

    PoolManager::reset();
    let rebuilt = PoolManager::init(config).unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(rebuilt.pool().stats().created, 0);

    // Clients handed out before the reset keep their pool
    runtime.block_on(async {
        assert_eq!(client.get("k").await.unwrap(), Some(Bytes::from("v")));
    });
    assert_eq!(first.pool().stats().created, 1);

    PoolManager::reset();
}
