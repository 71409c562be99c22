//! Start delay before the pipeline launches. Kept in its own test binary
//! because it signals the test process itself.

#![cfg(unix)]

use castwarden::{wait_start_delay, HostSignals, SignalKind};
use std::time::{Duration, Instant};

// One test so the raised signal cannot leak into a sibling's wait.
#[tokio::test]
async fn test_start_delay_elapses_or_is_cut_short() {
    let mut signals = HostSignals::install().unwrap();

    let started = Instant::now();
    assert_eq!(wait_start_delay(Duration::from_millis(50), &mut signals).await, None);
    assert!(started.elapsed() >= Duration::from_millis(50));

    assert_eq!(wait_start_delay(Duration::ZERO, &mut signals).await, None);

    unsafe {
        libc::raise(libc::SIGTERM);
    }
    let started = Instant::now();
    let kind = tokio::time::timeout(
        Duration::from_secs(10),
        wait_start_delay(Duration::from_secs(30), &mut signals),
    )
    .await
    .unwrap();
    assert_eq!(kind, Some(SignalKind::Terminate));
    assert!(started.elapsed() < Duration::from_secs(10));
}
