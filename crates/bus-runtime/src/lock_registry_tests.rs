//! Tests for the lock token registry.

use super::*;
use chrono::Duration;

fn live_expiry() -> Timestamp {
    Timestamp::now() + Duration::seconds(30)
}

#[test]
fn test_add_and_contains() {
    let registry = LockTokenRegistry::new();
    let token = LockToken::new();

    assert!(!registry.contains(&token));
    registry.add(token, live_expiry());
    assert!(registry.contains(&token));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_expired_entry_reads_as_absent() {
    let registry = LockTokenRegistry::new();
    let token = LockToken::new();

    registry.add(token, Timestamp::now() + Duration::milliseconds(-1));
    assert!(!registry.contains(&token));
    assert_eq!(registry.len(), 0);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_entry_expires_over_time() {
    let registry = LockTokenRegistry::new();
    let token = LockToken::new();

    registry.add(token, Timestamp::now() + Duration::milliseconds(50));
    assert!(registry.contains(&token));

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert!(!registry.contains(&token));
}

#[test]
fn test_remove() {
    let registry = LockTokenRegistry::new();
    let token = LockToken::new();

    registry.add(token, live_expiry());
    assert!(registry.remove(&token));
    assert!(!registry.contains(&token));
    // Second removal finds nothing
    assert!(!registry.remove(&token));
}

#[test]
fn test_remove_expired_entry_reports_absent() {
    let registry = LockTokenRegistry::new();
    let token = LockToken::new();

    registry.add(token, Timestamp::now() + Duration::milliseconds(-1));
    assert!(!registry.remove(&token));
}

#[test]
fn test_sweep_expired() {
    let registry = LockTokenRegistry::new();
    let live = LockToken::new();
    let dead = LockToken::new();

    registry.add(live, live_expiry());
    registry.add(dead, Timestamp::now() + Duration::milliseconds(-1));
    registry.sweep_expired();

    assert!(registry.contains(&live));
    assert!(!registry.contains(&dead));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_add_sweeps_at_threshold() {
    let registry = LockTokenRegistry::new();
    for _ in 0..SWEEP_THRESHOLD {
        registry.add(LockToken::new(), Timestamp::now() + Duration::milliseconds(-1));
    }

    // The insert that crosses the threshold purges the expired bulk first.
    let token = LockToken::new();
    registry.add(token, live_expiry());

    let entries = registry.entries.read().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key(&token));
}

#[test]
fn test_concurrent_access() {
    let registry = std::sync::Arc::new(LockTokenRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let token = LockToken::new();
                    registry.add(token, Timestamp::now() + Duration::seconds(30));
                    assert!(registry.contains(&token));
                    assert!(registry.remove(&token));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(registry.is_empty());
}
