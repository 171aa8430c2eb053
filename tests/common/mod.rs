//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use echem_session::ConnectionState;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Upper bound for anything the tests wait on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `condition` until it holds or the test timeout expires
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Wait for the session to reach `target`
pub async fn wait_for_state(mut rx: watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(test_timeout(), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("session did not reach {}", target))
        .expect("session dropped");
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
