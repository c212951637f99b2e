//! Virtual time driver and cooperative executor for the simulation.
//!
//! This module implements the single logical clock and the task scheduler
//! every simulation process runs on. Tasks are plain `async fn` futures that
//! suspend only at explicit `sleep_ms` points; the executor advances the
//! virtual clock event-exactly:
//!
//! - All ready tasks are polled to their next suspension point before time
//!   moves at all, so a task observes consistent state between yields.
//! - When nothing is runnable, the clock jumps directly to the earliest
//!   pending deadline. No host time is consumed waiting.
//! - Timers due at the same virtual millisecond fire in registration order,
//!   and the ready queue is FIFO, so ties are broken deterministically.
//!
//! The timer queue is a `BTreeMap` of `(deadline, seq)` → waker behind a
//! `Mutex`; wakers must be `Send + Sync`, which is the only reason a lock
//! appears here at all. The executor itself is strictly single-threaded
//! and the lock is never contended.

use futures::task::{ArcWake, waker};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

type TaskId = u64;
type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Scheduler state reachable from wakers.
#[derive(Default)]
struct SchedulerState {
    /// Current virtual time in milliseconds. Monotone non-decreasing.
    now_ms: u64,
    /// Tasks ready to be polled, in wake order.
    ready: VecDeque<TaskId>,
    /// Pending timers: (virtual deadline, registration seq) → waker.
    timers: BTreeMap<(u64, u64), Waker>,
    /// Monotonic counter giving same-deadline timers a stable FIFO order.
    timer_seq: u64,
}

/// Task futures are not `Send`; they live outside the lock, keyed by id.
#[derive(Default)]
struct TaskStore {
    next_id: TaskId,
    futures: HashMap<TaskId, LocalFuture>,
}

struct TaskWaker {
    shared: Arc<Mutex<SchedulerState>>,
    task_id: TaskId,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let mut state = arc_self.shared.lock().unwrap();
        state.ready.push_back(arc_self.task_id);
    }
}

/// Handle to the virtual clock. Cheap to clone; passed explicitly to every
/// task (no hidden process global).
#[derive(Clone)]
pub struct VirtualClock {
    shared: Arc<Mutex<SchedulerState>>,
}

impl VirtualClock {
    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.shared.lock().unwrap().now_ms
    }

    /// Suspend the calling task for at least `ms` virtual milliseconds.
    /// `sleep_ms(0)` completes without yielding.
    pub fn sleep_ms(&self, ms: u64) -> Sleep {
        let deadline_ms = {
            let state = self.shared.lock().unwrap();
            state.now_ms.saturating_add(ms)
        };
        Sleep {
            shared: self.shared.clone(),
            deadline_ms,
            key: None,
        }
    }
}

/// Handle used to register new tasks, including from inside running tasks.
#[derive(Clone)]
pub struct Spawner {
    shared: Arc<Mutex<SchedulerState>>,
    tasks: Rc<RefCell<TaskStore>>,
}

impl Spawner {
    /// Register a task. It is polled for the first time before virtual time
    /// next advances, after all currently-ready tasks.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let id = {
            let mut store = self.tasks.borrow_mut();
            let id = store.next_id;
            store.next_id += 1;
            store.futures.insert(id, Box::pin(future));
            id
        };
        self.shared.lock().unwrap().ready.push_back(id);
    }
}

/// Future returned by [`VirtualClock::sleep_ms`].
pub struct Sleep {
    shared: Arc<Mutex<SchedulerState>>,
    deadline_ms: u64,
    key: Option<(u64, u64)>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.shared.lock().unwrap();
        if state.now_ms >= this.deadline_ms {
            if let Some(key) = this.key.take() {
                state.timers.remove(&key);
            }
            return Poll::Ready(());
        }
        let key = match this.key {
            Some(key) => key,
            None => {
                let key = (this.deadline_ms, state.timer_seq);
                state.timer_seq += 1;
                this.key = Some(key);
                key
            }
        };
        state.timers.insert(key, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.lock().unwrap().timers.remove(&key);
        }
    }
}

/// The executor. One instance per simulation run.
pub struct Engine {
    shared: Arc<Mutex<SchedulerState>>,
    tasks: Rc<RefCell<TaskStore>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SchedulerState::default())),
            tasks: Rc::new(RefCell::new(TaskStore::default())),
        }
    }

    pub fn clock(&self) -> VirtualClock {
        VirtualClock {
            shared: self.shared.clone(),
        }
    }

    pub fn spawner(&self) -> Spawner {
        Spawner {
            shared: self.shared.clone(),
            tasks: self.tasks.clone(),
        }
    }

    /// Poll every ready task until the ready queue is empty. Tasks spawned
    /// or re-woken while draining are picked up in the same pass.
    fn drain_ready(&self) {
        loop {
            let task_id = {
                let mut state = self.shared.lock().unwrap();
                state.ready.pop_front()
            };
            let Some(task_id) = task_id else {
                return;
            };
            // Removed while polled so a reentrant spawn cannot alias it;
            // None means the task already completed (stale wake).
            let future = self.tasks.borrow_mut().futures.remove(&task_id);
            let Some(mut future) = future else {
                continue;
            };
            let task_waker = waker(Arc::new(TaskWaker {
                shared: self.shared.clone(),
                task_id,
            }));
            let mut cx = Context::from_waker(&task_waker);
            if future.as_mut().poll(&mut cx).is_pending() {
                self.tasks.borrow_mut().futures.insert(task_id, future);
            }
        }
    }

    /// Run until the virtual clock reaches `until_ms`. Events scheduled at
    /// exactly `until_ms` are executed before returning; the clock never
    /// moves past `until_ms` even when later timers are pending.
    pub fn run_until_ms(&self, until_ms: u64) {
        loop {
            self.drain_ready();
            // Collect wakers under the lock, wake after releasing it: waking
            // re-enters the lock through TaskWaker.
            let due_wakers = {
                let mut state = self.shared.lock().unwrap();
                match state.timers.keys().next().copied() {
                    Some((deadline, _)) if deadline <= until_ms => {
                        state.now_ms = deadline;
                        let due_keys: Vec<(u64, u64)> = state
                            .timers
                            .range(..=(deadline, u64::MAX))
                            .map(|(key, _)| *key)
                            .collect();
                        let wakers: Vec<Waker> = due_keys
                            .iter()
                            .filter_map(|key| state.timers.remove(key))
                            .collect();
                        Some(wakers)
                    }
                    _ => {
                        state.now_ms = state.now_ms.max(until_ms);
                        None
                    }
                }
            };
            match due_wakers {
                Some(wakers) => {
                    for w in wakers {
                        w.wake();
                    }
                }
                None => return,
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
