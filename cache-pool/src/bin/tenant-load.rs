//! Multi-tenant load generator.
//!
//! Drives concurrent SET/GET traffic for several tenants through the
//! process-wide pool, then checks that every tenant only sees its own
//! values. Connection settings come from the `CACHE_*` environment
//! variables (or `.env`).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cache_pool::{KeyValue, PoolManager};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Number of distinct tenants sharing the pool
const TENANTS: usize = 8;

/// Concurrent workers per tenant
const WORKERS_PER_TENANT: usize = 16;

/// SET + GET pairs issued by each worker
const REQUESTS_PER_WORKER: u64 = 250;

/// Give up on a checkout after this long instead of waiting forever
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct LoadStats {
    sets: AtomicU64,
    gets: AtomicU64,
    mismatches: AtomicU64,
    failed: AtomicU64,
}

impl LoadStats {
    fn print_summary(&self, elapsed: Duration) {
        let sets = self.sets.load(Ordering::Relaxed);
        let gets = self.gets.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = sets + gets + failed;
        let secs = elapsed.as_secs_f64();

        println!();
        println!("Test Duration:       {} ms", elapsed.as_millis());
        println!("Total Operations:    {total}");
        println!("  SET operations:    {sets}");
        println!("  GET operations:    {gets}");
        println!("  Cross-tenant hits: {}", self.mismatches.load(Ordering::Relaxed));
        println!("  Failed:            {failed}");
        if secs > 0.0 {
            println!("Throughput:          {:.0} ops/sec", total as f64 / secs);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cache_pool=info".parse()?))
        .init();

    let manager = PoolManager::instance()?;
    let config = manager.config();
    info!(
        "Load test against {} with {} tenants x {} workers (pool max {})",
        config.endpoint(),
        TENANTS,
        WORKERS_PER_TENANT,
        config.max_connections
    );

    // Fail fast if the server is unreachable
    manager.get_client(None)?.execute(cache_pool::Command::new("PING")).await?;

    let stats = Arc::new(LoadStats::default());
    let start = Instant::now();
    let mut tasks = JoinSet::new();

    for tenant in 0..TENANTS {
        for worker in 0..WORKERS_PER_TENANT {
            let client = manager
                .get_client(Some(&format!("tenant-{tenant}")))?
                .with_acquire_timeout(ACQUIRE_TIMEOUT);
            let stats = stats.clone();

            tasks.spawn(async move {
                for i in 0..REQUESTS_PER_WORKER {
                    // Same key in every tenant; the prefix keeps them apart
                    let key = format!("worker-{worker}:item-{i}");
                    let value = format!("tenant-{tenant}");

                    if let Err(e) = client.set(key.as_str(), value.as_str()).await {
                        warn!("SET failed: {e}");
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    stats.sets.fetch_add(1, Ordering::Relaxed);

                    match client.get(key.as_str()).await {
                        Ok(Some(read)) if read == value.as_bytes() => {
                            stats.gets.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(other) => {
                            // Another tenant's write landed on our key
                            error!("Tenant {tenant} read {other:?} for {key}");
                            stats.mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!("GET failed: {e}");
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Worker panicked: {e}");
        }
    }

    stats.print_summary(start.elapsed());
    let pool = manager.pool().stats();
    println!(
        "Pool:                {} opened, {} idle, {} waits (max {})",
        pool.created, pool.idle, pool.waits, pool.max_connections
    );

    if stats.mismatches.load(Ordering::Relaxed) > 0 {
        return Err("tenant isolation violated".into());
    }
    Ok(())
}
