use cache_pool::{Command, Frame, KeyValue, get_cache_client};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Start a server first: cargo run --bin server-tcp
    // and point CACHE_PORT at it if it is not on 6379.
    let acme = get_cache_client(Some("acme"))?;
    let globex = get_cache_client(Some("globex"))?;
    let admin = get_cache_client(None)?;

    println!("\n=== Tenant writes ===");
    acme.set("greeting", "hello from acme").await?;
    globex.set("greeting", "hello from globex").await?;
    println!("acme   greeting: {:?}", acme.get("greeting").await?);
    println!("globex greeting: {:?}", globex.get("greeting").await?);

    println!("\n=== Counters and hashes ===");
    println!("acme visits: {}", acme.incr_by("visits", 1).await?);
    acme.hset("profile", "plan", "gold").await?;
    println!("acme plan:   {:?}", acme.hget("profile", "plan").await?);

    println!("\n=== Raw keyspace (unscoped) ===");
    if let Frame::Array(keys) = admin.execute(Command::new("KEYS").arg("*")).await? {
        for key in keys {
            if let Some(raw) = key.as_bytes() {
                println!("  {}", String::from_utf8_lossy(raw));
            }
        }
    }

    Ok(())
}
