// crates/network/examples/network_demo.rs
//! Demonstration of the network resilience layer

use breakwater_network::{
    ConnectionState, NetworkConfig, NetworkManager, OfflineOperationQueue, Priority,
    QueueDisposition, ResilienceError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
[circuit_breaker]
failure_threshold = 3
recovery_timeout_ms = 500

[backoff]
base_delay_ms = 50
jitter_ms = 10

[resources]
max_active_connections = 2
"#;

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("Breakwater Network Demo");
    println!("=======================\n");

    let config = match NetworkConfig::from_toml_str(CONFIG) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to parse config: {}", e);
            return;
        }
    };

    let manager = match NetworkManager::from_config(&config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to build manager: {}", e);
            return;
        }
    };

    demo_retry(&manager).await;
    println!();
    demo_breaker(&manager).await;
    println!();
    demo_offline_queue(&manager).await;
}

async fn demo_retry(manager: &NetworkManager) {
    println!("1. Flaky Service");
    println!("----------------");

    let calls = Arc::new(AtomicU32::new(0));
    let op = manager.operation("fetch-catalog").with_priority(Priority::High);

    let result = manager
        .execute(op, |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                println!("  Attempt {}", attempt);
                if attempt < 3 {
                    Err(ResilienceError::Transient("503 Service Unavailable".into()))
                } else {
                    Ok("catalog")
                }
            }
        })
        .await;

    match result.into_result() {
        Ok(value) => println!("  ✓ Got {} after {} calls", value, calls.load(Ordering::SeqCst)),
        Err(e) => println!("  ✗ Failed: {}", e),
    }
}

async fn demo_breaker(manager: &NetworkManager) {
    println!("2. Circuit Breaker");
    println!("------------------");

    for i in 1..=5 {
        let op = manager.operation(format!("broken-{}", i)).with_max_retries(0);
        let result = manager
            .execute(op, |_| async {
                Err::<(), _>(ResilienceError::ConnectionLost("connection reset".into()))
            })
            .await;

        if let Some(e) = result.error() {
            println!("  Call {}: {} (breaker {:?})", i, e, manager.breaker().state());
        }
    }

    println!("  Waiting for recovery timeout...");
    tokio::time::sleep(Duration::from_millis(600)).await;

    let result = manager
        .execute(manager.operation("recovered"), |_| async { Ok(()) })
        .await;
    println!(
        "  Trial call {}: breaker {:?}",
        if result.is_success() { "succeeded" } else { "failed" },
        manager.breaker().state()
    );
}

async fn demo_offline_queue(manager: &NetworkManager) {
    println!("3. Offline Queue");
    println!("----------------");

    let queue = OfflineOperationQueue::new(manager.monitor().clone());
    manager.monitor().simulate_connection_loss();

    for name in ["save-progress", "upload-notes", "sync-bookmarks"] {
        let disposition = queue
            .queue_operation(name, move || async move { Ok(name.len()) })
            .await;
        if let QueueDisposition::Queued { position } = disposition {
            println!("  Queued {} at position {}", name, position);
        }
    }

    let completed = queue
        .set_network_state_and_execute_queued(ConnectionState::Connected)
        .await;
    for op in completed {
        println!("  Ran {} after waiting {:?}", op.name, op.waited);
    }

    let stats = manager.stats();
    println!(
        "  Connection {:?}, {} active connections",
        stats.connection, stats.resources.active_connections
    );
}
