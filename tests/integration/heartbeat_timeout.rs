//! Scenario D — heartbeat timeout (`spec.md` §8).
//!
//! A connection that never refreshes its heartbeat gets closed by the
//! watchdog once `2 * check_interval` has elapsed with no activity; a
//! connection that keeps refreshing survives past that same window.

use std::time::Duration;

use mesh_cluster::{Connection, Scheduler};
use mesh_test_utils::loopback_pair;

#[tokio::test]
async fn idle_connection_is_closed_after_two_check_intervals() {
    let scheduler = Scheduler::with_wheel(64, Duration::from_millis(100));
    let (server_stream, _client_stream) = loopback_pair().await;
    let (_read_half, write_half) = server_stream.into_split();
    let conn = Connection::new(write_half, 1, -1);
    conn.refresh_heartbeat();
    conn.spawn_heartbeat_watchdog(&scheduler, Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!conn.is_closed(), "must not close before the timeout window elapses");

    tokio::time::sleep(Duration::from_millis(1800)).await;
    assert!(conn.is_closed(), "must close once 2x the check interval passes with no activity");

    scheduler.stop().await;
}

#[tokio::test]
async fn connection_refreshed_within_the_window_survives() {
    let scheduler = Scheduler::with_wheel(64, Duration::from_millis(100));
    let (server_stream, _client_stream) = loopback_pair().await;
    let (_read_half, write_half) = server_stream.into_split();
    let conn = Connection::new(write_half, 2, -1);
    conn.refresh_heartbeat();
    conn.spawn_heartbeat_watchdog(&scheduler, Duration::from_secs(1));

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(700)).await;
        conn.refresh_heartbeat();
        assert!(!conn.is_closed(), "a connection refreshed inside every window must stay open");
    }

    scheduler.stop().await;
}
