//! End-to-end checks of the limiters through their public API.

use std::sync::Arc;
use std::time::Duration;

use dripgate_core::{Clock, LimitError, SystemClock, TokenBucket, Verdict};
use dripgate_test_utils::config::{TestConfigBuilder, TestConfigFile};
use dripgate_test_utils::limiter::{manual_admission, manual_bucket, manual_hosts};
use pretty_assertions::assert_eq;

// ── Single bucket ─────────────────────────────────────────────────

#[test_log::test]
fn burst_then_recovery() {
    let (rl, clock) = manual_bucket(3, 2, 5);

    for _ in 0..5 {
        assert!(rl.try_take(1));
    }
    assert!(!rl.try_take(1));

    // 700ms at 3 tokens / 2s earns 1.05 tokens
    clock.advance_ms(700);
    assert!(rl.allow());
    assert!(!rl.try_take(3));
}

#[test_log::test]
fn steady_rate_cadence() {
    let (rl, clock) = manual_bucket(5, 2, 0);

    for _ in 0..5 {
        assert!(!rl.limit());
    }
    assert!(rl.limit());

    clock.advance_ms(250);
    assert!(rl.limit());

    // 750ms in total, past the 400ms cost of one token
    clock.advance_ms(500);
    assert!(!rl.limit());
    assert!(rl.limit());
}

#[test]
fn unlimited_pass_through() {
    let (rl, clock) = manual_bucket(0, 1, 0);
    for i in 0..50_000u64 {
        if i % 1000 == 0 {
            clock.advance_ms(i);
        }
        assert!(rl.allow());
    }
}

#[tokio::test]
async fn wait_has_no_clock_drift() {
    let (rl, clock) = manual_bucket(5, 1, 0);
    assert!(rl.try_take(5));

    let expected = clock.now() + Duration::from_millis(400);
    rl.wait(2).await.unwrap();
    assert_eq!(clock.now(), expected);
}

#[tokio::test]
async fn concurrent_waiters_are_paced() {
    // 100 tokens per second, starting empty: 20 waiters need about 200ms.
    let rl = Arc::new(TokenBucket::with_clock(100, 1, 0, Arc::new(SystemClock)).unwrap());
    assert!(rl.try_take(100));

    let start = std::time::Instant::now();
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let rl = Arc::clone(&rl);
            tokio::spawn(async move { rl.wait(1).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn timeout_cancels_wait() {
    let rl = TokenBucket::new(1, 60).unwrap();
    assert!(rl.allow());
    let result = rl
        .wait_until(1, tokio::time::sleep(Duration::from_millis(10)))
        .await;
    assert_eq!(result, Err(LimitError::Cancelled));
}

// ── Host limiter ──────────────────────────────────────────────────

#[test_log::test]
fn per_host_isolation() {
    let (hosts, _clock) = manual_hosts(2, 1, 0, 16);

    assert!(hosts.allow("198.51.100.1:4000"));
    assert!(hosts.allow("198.51.100.1:4001"));
    assert!(hosts.limit("198.51.100.1:4002"));

    assert!(hosts.allow("198.51.100.2:4000"));
    assert!(hosts.allow("198.51.100.2:4000"));
}

#[test_log::test]
fn bounded_memory_under_churn() {
    let (hosts, _clock) = manual_hosts(1, 3600, 0, 100);

    for i in 0..10_000u32 {
        let addr = format!("10.{}.{}.{}:80", i >> 16, (i >> 8) & 0xff, i & 0xff);
        assert!(hosts.allow(&addr));
        assert!(hosts.len() <= 100);
    }
    assert_eq!(hosts.len(), 100);

    // the very first host was evicted long ago and comes back with a full bucket
    assert!(!hosts.contains("10.0.0.0:80"));
    assert!(hosts.allow("10.0.0.0:80"));
    assert!(hosts.limit("10.0.0.0:80"));
}

#[test]
fn concurrent_first_sight_counts_once() {
    let (hosts, _clock) = manual_hosts(4, 3600, 0, 8);
    let hosts = Arc::new(hosts);

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let hosts = Arc::clone(&hosts);
            std::thread::spawn(move || hosts.allow(format!("203.0.113.9:{}", 2000 + i)))
        })
        .collect();
    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(admitted, 4);
    assert_eq!(hosts.len(), 1);
}

// ── Admission control ─────────────────────────────────────────────

#[test_log::test]
fn admission_from_builder() {
    let config = TestConfigBuilder::new()
        .global(4, 1)
        .per_host(2, 1, 16)
        .build();
    let (control, clock) = manual_admission(&config);

    assert_eq!(control.admit(Some("a:1")), Verdict::Admitted);
    assert_eq!(control.admit(Some("a:1")), Verdict::Admitted);
    assert_eq!(control.admit(Some("a:1")), Verdict::HostLimited);
    assert_eq!(control.admit(Some("b:1")), Verdict::Admitted);
    assert_eq!(control.admit(None), Verdict::Admitted);
    assert_eq!(control.admit(Some("c:1")), Verdict::GlobalLimited);

    clock.advance_ms(500);
    assert_eq!(control.admit(Some("c:1")), Verdict::Admitted);
}

#[test_log::test]
fn admission_with_bursts() {
    let config = TestConfigBuilder::new()
        .global(2, 1)
        .global_burst(5)
        .per_host(1, 1, 8)
        .host_burst(3)
        .build();
    let (control, _clock) = manual_admission(&config);

    for _ in 0..3 {
        assert_eq!(control.admit(Some("a:1")), Verdict::Admitted);
    }
    assert_eq!(control.admit(Some("a:1")), Verdict::HostLimited);

    assert_eq!(control.admit(Some("b:1")), Verdict::Admitted);
    assert_eq!(control.admit(Some("b:1")), Verdict::Admitted);
    assert_eq!(control.admit(Some("b:1")), Verdict::GlobalLimited);
}

#[tokio::test]
async fn admission_from_config_file() {
    let file = TestConfigFile::with_toml(
        r#"
        [global]
        rate = 3
        per_secs = 2
        burst = 5

        [per_host]
        rate = 1
        per_secs = 10
        max_hosts = 2
        "#,
    )
    .await;
    let config = file.load().await;
    let (control, _clock) = manual_admission(&config);

    assert_eq!(control.global().capacity(), 5.0);
    assert_eq!(control.hosts().max_entries(), 2);
    assert!(control.admit(Some("192.0.2.1:1")).is_admitted());
    assert_eq!(control.admit(Some("192.0.2.1:2")), Verdict::HostLimited);
}
