//! Scenario E — overload (`spec.md` §8).
//!
//! A saturated shard rejects further work with `QueueFull` once it has been
//! full for the whole 3-second `put` timeout; an unrelated shard keeps
//! accepting work the entire time.

use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use mesh_cluster::WorkShardPool;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_saturated_shard_rejects_work_while_another_stays_healthy() {
    let pool = WorkShardPool::new(2);

    // Wedge shard 0's single worker on a task that won't return until the
    // test releases it.
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    pool.put(0, async move {
        let _ = release_rx.recv();
    })
    .await
    .unwrap();

    // Fill shard 0's bounded buffer (capacity 256) with no-ops behind the
    // wedged task.
    for _ in 0..256 {
        pool.put(0, async {}).await.unwrap();
    }

    // Shard 1 is untouched and must keep accepting work immediately.
    pool.put(1, async {}).await.unwrap();

    let started = Instant::now();
    let result = pool.put(0, async {}).await;
    assert!(result.is_err(), "a full shard must eventually reject further work");
    assert!(started.elapsed() >= Duration::from_secs(3), "rejection must wait out the full put timeout");

    // Unwedging drains the backlog; a later put on the same shard succeeds.
    let _ = release_tx.send(());
    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.put(0, async {}).await.unwrap();
}
