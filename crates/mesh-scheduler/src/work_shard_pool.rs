use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

const SHARD_CAPACITY: usize = 256;
const PUT_TIMEOUT: Duration = Duration::from_secs(3);

type ShardTask = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum ShardError {
    /// Shard stayed full for the whole 3-second timeout — a fatal-class
    /// condition indicating sustained overload on that shard.
    #[error("work shard queue full")]
    QueueFull,
    #[error("work shard pool is shut down")]
    Closed,
}

/// `N` bounded FIFO channels of futures, `N` = logical CPU count by default.
///
/// A session id hashes to a fixed shard (`session_id mod N`), so all work
/// for one session runs to completion in enqueue order on one worker before
/// the next task for that session starts, while distinct sessions
/// parallelize across shards. A slow session only ever backs up its own
/// shard. Each future is awaited in full before the shard's worker pulls the
/// next one — queuing a task and spawning it detached would only serialize
/// *enqueueing*, not execution, breaking the in-order guarantee this type
/// exists to provide.
pub struct WorkShardPool {
    shards: Vec<mpsc::Sender<ShardTask>>,
}

impl WorkShardPool {
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = mpsc::channel(SHARD_CAPACITY);
            tokio::spawn(Self::run_shard(rx));
            shards.push(tx);
        }
        Self { shards }
    }

    /// Size the pool to the machine's logical CPU count, as the spec requires.
    #[must_use]
    pub fn new_default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, session_id: i64) -> usize {
        session_id.rem_euclid(self.shards.len() as i64) as usize
    }

    /// `Put(sessionID, fn)` — enqueue with a 3-second timeout. `fut` is
    /// awaited to completion by the shard's worker before it picks up the
    /// next queued task for that shard.
    pub async fn put<F>(&self, session_id: i64, fut: F) -> Result<(), ShardError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shard = &self.shards[self.shard_for(session_id)];
        match tokio::time::timeout(PUT_TIMEOUT, shard.send(Box::pin(fut))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ShardError::Closed),
            Err(_) => Err(ShardError::QueueFull),
        }
    }

    /// Runs each queued future to completion before pulling the next one,
    /// so per-shard ordering holds for the work itself, not just its
    /// enqueueing. A panicking task is caught via its `tokio::spawn` join
    /// error rather than aborting the shard.
    async fn run_shard(mut rx: mpsc::Receiver<ShardTask>) {
        while let Some(task) = rx.recv().await {
            if let Err(err) = tokio::spawn(task).await {
                tracing::error!(error = %err, "work shard: task panicked, recovering");
            }
        }
    }
}
