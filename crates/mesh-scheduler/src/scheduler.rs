use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::timer_wheel::{TimerCallback, TimerId, TimerWheel};

pub const DEFAULT_SLOT_NUM: usize = 1024;
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// A unit of work enqueued onto a [`Scheduler`]'s mailbox.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(TaskFn),
    Stop,
}

pub(crate) fn run_with_panic_guard(task: TaskFn) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(panic = %message, "scheduler: task panicked, recovering");
    }
}

struct Inner {
    started: AtomicBool,
    stop: CancellationToken,
    tasks_tx: mpsc::UnboundedSender<Message>,
    wheel: Mutex<TimerWheel>,
    handles: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

/// Owns a FIFO task queue and a hierarchical timing wheel.
///
/// A single consumer task drains the queue in order, giving every model's
/// mailbox single-threaded, serialized execution regardless of how many
/// producers call [`Scheduler::push_task`] concurrently. Expired timers are
/// never invoked on the tick task itself — they're pushed back onto this
/// same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_wheel(DEFAULT_SLOT_NUM, DEFAULT_TICK)
    }

    #[must_use]
    pub fn with_wheel(slot_num: usize, tick: Duration) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            started: AtomicBool::new(true),
            stop: CancellationToken::new(),
            tasks_tx,
            wheel: Mutex::new(TimerWheel::new(slot_num, tick)),
            handles: Mutex::new(None),
        });

        let executor = tokio::spawn(Self::run_executor(tasks_rx));
        let ticker = tokio::spawn(Self::run_ticker(inner.clone(), tick));
        *inner.handles.lock().unwrap() = Some((executor, ticker));

        Self { inner }
    }

    async fn run_executor(mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Run(task) => run_with_panic_guard(task),
                Message::Stop => break,
            }
        }
    }

    async fn run_ticker(inner: Arc<Inner>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = inner.stop.cancelled() => break,
                _ = interval.tick() => {
                    let due = inner.wheel.lock().unwrap().tick();
                    for callback in due {
                        let _ = inner.tasks_tx.send(Message::Run(Box::new(move || callback())));
                    }
                }
            }
        }
    }

    /// `PushTask` — enqueue a one-shot unit of work. Silently dropped once stopped.
    pub fn push_task(&self, fn_: impl FnOnce() + Send + 'static) {
        if !self.inner.started.load(Ordering::Acquire) {
            return;
        }
        let _ = self.inner.tasks_tx.send(Message::Run(Box::new(fn_)));
    }

    /// `PushAfter` — fire once after `delay`.
    pub fn push_after(&self, delay: Duration, fn_: impl Fn() + Send + Sync + 'static) -> Option<TimerId> {
        self.push_timer(delay, false, fn_)
    }

    /// `PushEvery` — fire repeatedly every `interval`.
    pub fn push_every(&self, interval: Duration, fn_: impl Fn() + Send + Sync + 'static) -> Option<TimerId> {
        self.push_timer(interval, true, fn_)
    }

    fn push_timer(
        &self,
        interval: Duration,
        recurring: bool,
        fn_: impl Fn() + Send + Sync + 'static,
    ) -> Option<TimerId> {
        if !self.inner.started.load(Ordering::Acquire) {
            return None;
        }
        let callback: TimerCallback = Arc::new(fn_);
        Some(self.inner.wheel.lock().unwrap().add_timer(interval, recurring, callback))
    }

    /// `CancelTimer`.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.inner.wheel.lock().unwrap().cancel_timer(id)
    }

    /// Stop accepting new work, drain whatever is already queued, and join
    /// both background tasks.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.stop.cancel();
        let _ = self.inner.tasks_tx.send(Message::Stop);
        let handles = self.inner.handles.lock().unwrap().take();
        if let Some((executor, ticker)) = handles {
            let _ = executor.await;
            let _ = ticker.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
