// crates/resilience/examples/resilience_demo.rs
//! Demonstration of resilience patterns

use breakwater_resilience::{
    BackoffCalculator, CircuitBreaker, CircuitBreakerConfig, ResilienceError, RetryExecutor,
    Timeout,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("Resilience Patterns Demo");
    println!("========================\n");

    demo_backoff();
    println!();
    demo_retry().await;
    println!();
    demo_circuit_breaker().await;
    println!();
    demo_timeout().await;
}

fn demo_backoff() {
    println!("1. Backoff Schedule");
    println!("-------------------");

    let backoff = BackoffCalculator::new(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_jitter(Duration::from_millis(25));

    for attempt in 1..=6 {
        println!("  Attempt {}: wait {:?}", attempt, backoff.calculate_delay(attempt));
    }
}

async fn demo_retry() {
    println!("2. Retry Pattern");
    println!("----------------");

    let retry = RetryExecutor::new(BackoffCalculator::new(Duration::from_millis(100)));
    let calls = Arc::new(AtomicU32::new(0));

    let report = retry
        .execute_with_retry(3, |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                println!("  Attempt {}", attempt);
                if attempt < 3 {
                    Err(ResilienceError::Transient("Simulated failure".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

    match report.result {
        Ok(value) => println!(
            "✓ Success after {} attempts in {:?}: {}",
            report.attempts, report.elapsed, value
        ),
        Err(e) => println!("✗ Failed: {}", e),
    }
}

async fn demo_circuit_breaker() {
    println!("3. Circuit Breaker Pattern");
    println!("--------------------------");

    let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_millis(100)));

    for i in 1..=5 {
        let result: Result<i32, ResilienceError> = cb
            .call(|| async move {
                if i <= 3 {
                    Err(ResilienceError::Transient("Service unavailable".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        match result {
            Ok(_) => println!("  Request {}: ✓ Success", i),
            Err(e) => println!("  Request {}: ✗ {}", i, e),
        }
    }

    println!("  Circuit state: {:?}", cb.state());

    tokio::time::sleep(Duration::from_millis(150)).await;
    println!("  Waited for recovery timeout...");

    let result: Result<i32, ResilienceError> = cb.call(|| async { Ok(42) }).await;
    match result {
        Ok(_) => println!("  Probe: ✓ Request succeeded"),
        Err(e) => println!("  Probe: ✗ {}", e),
    }

    println!("  Circuit state: {:?}", cb.state());
}

async fn demo_timeout() {
    println!("4. Timeout Pattern");
    println!("------------------");

    let timeout = Timeout::new(Duration::from_millis(50));

    let fast = timeout
        .execute(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;
    match fast {
        Ok(value) => println!("  Fast operation: ✓ Completed: {}", value),
        Err(e) => println!("  Fast operation: ✗ {}", e),
    }

    let slow = timeout
        .execute(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;
    match slow {
        Ok(value) => println!("  Slow operation: ✓ Completed: {}", value),
        Err(e) => println!("  Slow operation: ✗ {}", e),
    }
}
