//! End-to-end circuit breaker behavior under scheduled ticks.

use keel_sched::{CircuitBreakerConfig, CircuitState, Scheduler, TaskSpec, TaskState};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Three consecutive failures open the circuit; ticks inside the cooldown
/// are skipped; after the cooldown a single half-open probe runs and, on
/// success, closes the circuit again.
#[tokio::test(start_paused = true)]
async fn breaker_opens_skips_probes_and_recovers() {
    let scheduler = Scheduler::default();
    let attempts = Arc::new(AtomicU32::new(0));
    let healthy = Arc::new(AtomicBool::new(false));

    let spec = {
        let attempts = attempts.clone();
        let healthy = healthy.clone();
        TaskSpec::new("flaky", "flaky sync", Duration::from_secs(1), move || {
            let attempts = attempts.clone();
            let healthy = healthy.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if healthy.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err("downstream unavailable".into())
                }
            }
        })
        .with_breaker(CircuitBreakerConfig {
            max_failures: 3,
            reset: Duration::from_secs(60),
            half_open_retries: 1,
        })
    };
    scheduler.register(spec).await.unwrap();
    scheduler.start().await;

    // Ticks at t=1,2,3 fail and open the circuit.
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let status = scheduler.status("flaky").await.unwrap();
    assert_eq!(status.circuit, CircuitState::Open);
    assert_eq!(status.consecutive_failures, 3);

    // Ticks within the cooldown are skipped entirely.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        scheduler.status("flaky").await.unwrap().state,
        TaskState::CircuitOpen
    );

    // Past the cooldown, exactly one half-open probe runs; it succeeds and
    // the circuit closes.
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    let after_probe = attempts.load(Ordering::SeqCst);
    assert_eq!(after_probe, 4);
    let status = scheduler.status("flaky").await.unwrap();
    assert_eq!(status.circuit, CircuitState::Closed);
    assert_eq!(status.consecutive_failures, 0);

    // Closed again: normal cadence resumes.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(attempts.load(Ordering::SeqCst) > after_probe);
    scheduler.stop().await;
}

/// A probe that fails sends the breaker straight back to open.
#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_the_circuit() {
    let scheduler = Scheduler::default();
    let attempts = Arc::new(AtomicU32::new(0));

    let spec = {
        let attempts = attempts.clone();
        TaskSpec::new("dead", "dead sync", Duration::from_secs(1), move || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("still broken".into())
            }
        })
        .with_breaker(CircuitBreakerConfig {
            max_failures: 1,
            reset: Duration::from_secs(10),
            half_open_retries: 1,
        })
    };
    scheduler.register(spec).await.unwrap();
    scheduler.start().await;

    // First tick opens; probe after 10 s fails and re-opens.
    tokio::time::sleep(Duration::from_secs(12)).await;
    let after_probe = attempts.load(Ordering::SeqCst);
    assert_eq!(after_probe, 2);
    assert_eq!(
        scheduler.status("dead").await.unwrap().circuit,
        CircuitState::Open
    );

    // The next window allows exactly one more probe.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    scheduler.stop().await;
}

/// Operator reset closes the breaker without waiting out the cooldown.
#[tokio::test(start_paused = true)]
async fn reset_short_circuits_the_cooldown() {
    let scheduler = Scheduler::default();
    let attempts = Arc::new(AtomicU32::new(0));
    let healthy = Arc::new(AtomicBool::new(false));

    let spec = {
        let attempts = attempts.clone();
        let healthy = healthy.clone();
        TaskSpec::new("t", "t", Duration::from_secs(1), move || {
            let attempts = attempts.clone();
            let healthy = healthy.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if healthy.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err("boom".into())
                }
            }
        })
        .with_breaker(CircuitBreakerConfig {
            max_failures: 1,
            reset: Duration::from_secs(3600),
            half_open_retries: 1,
        })
    };
    scheduler.register(spec).await.unwrap();
    scheduler.start().await;

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        scheduler.status("t").await.unwrap().circuit,
        CircuitState::Open
    );

    healthy.store(true, Ordering::SeqCst);
    scheduler.reset_circuit_breaker("t").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = scheduler.status("t").await.unwrap();
    assert_eq!(status.circuit, CircuitState::Closed);
    assert!(status.last_success.is_some());
    scheduler.stop().await;
}
