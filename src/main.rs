use std::sync::Arc;

use borealis::cache::{ResourceCache, ResourceLoader};
use borealis::transaction::TransactionLog;
use borealis::CacheError;

/// Toy loader that fabricates a string per key
struct Greeter;

impl ResourceLoader for Greeter {
    type Resource = String;
    type Error = std::io::Error;

    fn load(&self, key: u64) -> Result<String, std::io::Error> {
        Ok(format!("resource #{}", key))
    }

    fn release(&self, key: u64, _resource: Arc<String>) {
        println!("  - loader took back key {}", key);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Borealis - cache and transaction log demo");
    println!("=========================================\n");

    // Resource cache with room for two entries
    let cache = ResourceCache::new(2, Greeter);
    println!("Created resource cache with capacity {:?}", cache.capacity());

    let a = cache.get(1).expect("Failed to load key 1");
    let b = cache.get(2).expect("Failed to load key 2");
    println!("Loaded {:?} and {:?}", a, b);

    match cache.get(3) {
        Err(CacheError::Full) => println!("Key 3 rejected: cache is full"),
        other => println!("Unexpected result for key 3: {:?}", other),
    }

    cache.release(1);
    let c = cache.get(3).expect("Failed to load key 3");
    println!("After releasing key 1, loaded {:?}", c);
    println!("Resident entries: {}\n", cache.len());

    println!("Closing cache:");
    cache.close();

    // Transaction log in a scratch location
    let base = std::env::temp_dir().join(format!("borealis-demo-{}", std::process::id()));
    let log = TransactionLog::create(&base).expect("Failed to create transaction log");
    println!("\nCreated transaction log: {}", log.path().display());

    let committed = log.begin().expect("Failed to begin");
    let aborted = log.begin().expect("Failed to begin");
    log.commit(committed).expect("Failed to commit");
    log.abort(aborted).expect("Failed to abort");
    println!("Committed {}, aborted {}", committed, aborted);

    let path = log.path().to_path_buf();
    log.close().expect("Failed to close transaction log");

    // Reopen and read the statuses back
    let log = TransactionLog::open(&base).expect("Failed to reopen transaction log");
    for xid in [committed, aborted] {
        println!(
            "  - {}: {}",
            xid,
            log.status(xid).expect("Failed to read status")
        );
    }
    log.close().expect("Failed to close transaction log");

    // Clean up
    std::fs::remove_file(path).ok();
    println!("\nDemo completed successfully!");
}
