use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A recurring or one-shot timer callback.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

pub type TimerId = u64;

struct TimerNode {
    callback: TimerCallback,
    interval: Duration,
    recurring: bool,
    rounds: u64,
    prev: Option<TimerId>,
    next: Option<TimerId>,
    slot: usize,
}

#[derive(Default)]
struct Slot {
    head: Option<TimerId>,
    tail: Option<TimerId>,
}

/// Hierarchical timing wheel: `slot_num` slots advanced one per `tick`.
///
/// Expired entries are *not* invoked here — [`TimerWheel::tick`] returns the
/// callbacks due this tick so the caller (the owning [`crate::Scheduler`])
/// can enqueue them onto its own task queue instead of running them inline.
///
/// Cancellation is O(1): each timer is a node in a flat arena (`nodes`)
/// carrying `prev`/`next` links, the Rust-safe analogue of an intrusive
/// doubly-linked slot list.
pub struct TimerWheel {
    slots: Vec<Slot>,
    nodes: HashMap<TimerId, TimerNode>,
    current: usize,
    slot_num: usize,
    tick: Duration,
    next_id: TimerId,
}

impl TimerWheel {
    #[must_use]
    pub fn new(slot_num: usize, tick: Duration) -> Self {
        let slot_num = if slot_num == 0 { 1024 } else { slot_num };
        let tick = if tick.is_zero() { Duration::from_secs(1) } else { tick };
        Self {
            slots: (0..slot_num).map(|_| Slot::default()).collect(),
            nodes: HashMap::new(),
            current: 0,
            slot_num,
            tick,
            next_id: 0,
        }
    }

    fn plan(&self, interval: Duration) -> (u64, u64, usize) {
        let interval = if interval.is_zero() { self.tick } else { interval };
        let mut ticks = (interval.as_nanos() / self.tick.as_nanos().max(1)) as u64;
        if ticks == 0 {
            ticks = 1;
        }
        let rounds = ticks / self.slot_num as u64;
        let slot_offset = (ticks % self.slot_num as u64) as usize;
        let slot = (self.current + slot_offset) % self.slot_num;
        (ticks, rounds, slot)
    }

    fn link(&mut self, slot: usize, id: TimerId) {
        let old_tail = self.slots[slot].tail;
        if let Some(tail_id) = old_tail {
            self.nodes.get_mut(&tail_id).unwrap().next = Some(id);
        } else {
            self.slots[slot].head = Some(id);
        }
        self.slots[slot].tail = Some(id);
        let node = self.nodes.get_mut(&id).unwrap();
        node.prev = old_tail;
        node.next = None;
        node.slot = slot;
    }

    fn unlink(&mut self, id: TimerId) {
        let (slot, prev, next) = {
            let node = &self.nodes[&id];
            (node.slot, node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next = next,
            None => self.slots[slot].head = next,
        }
        match next {
            Some(n) => self.nodes.get_mut(&n).unwrap().prev = prev,
            None => self.slots[slot].tail = prev,
        }
    }

    /// `PushAfter`/`PushEvery` — schedule a timer, returning its id.
    pub fn add_timer(&mut self, interval: Duration, recurring: bool, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let (ticks, rounds, slot) = self.plan(interval);
        self.nodes.insert(
            id,
            TimerNode { callback, interval, recurring, rounds, prev: None, next: None, slot },
        );
        let _ = ticks;
        self.link(slot, id);
        id
    }

    /// `CancelTimer` — O(1) removal via the id index and intrusive links.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        self.unlink(id);
        self.nodes.remove(&id);
        true
    }

    /// Advance the wheel by one tick, returning the callbacks now due.
    pub fn tick(&mut self) -> Vec<TimerCallback> {
        let slot = self.current;
        let mut due = Vec::new();
        let mut cursor = self.slots[slot].head;
        while let Some(id) = cursor {
            let next = self.nodes[&id].next;
            if self.nodes[&id].rounds > 0 {
                self.nodes.get_mut(&id).unwrap().rounds -= 1;
                cursor = next;
                continue;
            }

            self.unlink(id);
            let node = self.nodes.remove(&id).unwrap();
            due.push(node.callback.clone());

            if node.recurring {
                let (_, rounds, new_slot) = self.plan(node.interval);
                self.nodes.insert(
                    id,
                    TimerNode {
                        callback: node.callback,
                        interval: node.interval,
                        recurring: true,
                        rounds,
                        prev: None,
                        next: None,
                        slot: new_slot,
                    },
                );
                self.link(new_slot, id);
            }

            cursor = next;
        }
        self.current = (self.current + 1) % self.slot_num;
        due
    }
}
