//! Single-threaded cooperative executor driven by a [`VirtualClock`].
//!
//! Every node task and the wireless channel's per-receiver delivery futures
//! run as plain `Future<Output = ()>` state machines spawned here. The
//! executor never touches real threads: when the ready queue is empty it
//! asks the clock to jump to the next scheduled wakeup, which is exactly the
//! "only one task runs at a time, yielding at suspension points" model the
//! core requires.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::task::{ArcWake, waker};

use super::clock::VirtualClock;

type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

struct ReadyQueue {
    queue: Mutex<VecDeque<usize>>,
}

struct TaskWaker {
    id: usize,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    // `wake_by_ref` only ever enqueues an id; it never polls, so this stays
    // safe to call from inside `advance()` while the clock's timer heap is
    // still borrowed.
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.queue.lock().unwrap().push_back(arc_self.id);
    }
}

struct ExecutorInner {
    tasks: HashMap<usize, BoxFuture>,
    next_id: usize,
}

/// Owns the task table and ready queue. Held behind an `Rc` so the
/// [`Spawner`] handed to node tasks and the wireless channel can schedule
/// new work without the executor owning a reference back to itself.
pub struct Executor {
    inner: RefCell<ExecutorInner>,
    ready: Arc<ReadyQueue>,
    clock: VirtualClock,
}

impl Executor {
    pub fn new(clock: VirtualClock) -> Rc<Self> {
        Rc::new(Executor {
            inner: RefCell::new(ExecutorInner {
                tasks: HashMap::new(),
                next_id: 0,
            }),
            ready: Arc::new(ReadyQueue {
                queue: Mutex::new(VecDeque::new()),
            }),
            clock,
        })
    }

    fn spawn_boxed(self: &Rc<Self>, fut: BoxFuture) {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tasks.insert(id, fut);
        drop(inner);
        self.ready.queue.lock().unwrap().push_back(id);
    }

    /// Run until `sim_end` (in clock ticks) is reached or the simulation
    /// goes idle (no ready task and no pending timer). Tasks are never
    /// polled again after `sim_end`; this is the cancellation point the
    /// spec describes.
    pub fn run_to(self: &Rc<Self>, sim_end: u64) {
        loop {
            if self.clock.now() >= sim_end {
                return;
            }

            let next_id = self.ready.queue.lock().unwrap().pop_front();
            match next_id {
                Some(id) => self.poll_task(id),
                None => {
                    match self.clock.peek_next() {
                        Some(due) if due >= sim_end => {
                            self.clock.force_now(sim_end);
                            return;
                        }
                        Some(_) => {
                            if !self.clock.advance() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn poll_task(self: &Rc<Self>, id: usize) {
        let task = self.inner.borrow_mut().tasks.remove(&id);
        let Some(mut task) = task else {
            // Already completed and removed (its own waker fired twice,
            // which is harmless: the second ready-queue entry is a no-op).
            return;
        };

        let waker = waker(Arc::new(TaskWaker {
            id,
            ready: self.ready.clone(),
        }));
        let mut cx = Context::from_waker(&waker);

        match task.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {}
            Poll::Pending => {
                self.inner.borrow_mut().tasks.insert(id, task);
            }
        }
    }
}

/// A cloneable handle used to spawn detached tasks (per-node protocol
/// tasks, and the wireless channel's one-shot delivery futures) onto the
/// shared executor.
#[derive(Clone)]
pub struct Spawner {
    executor: Rc<Executor>,
}

impl Spawner {
    pub fn new(executor: Rc<Executor>) -> Self {
        Spawner { executor }
    }

    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.executor.spawn_boxed(Box::pin(fut));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn two_tasks_interleave_via_sleep_in_deterministic_order() {
        let clock = VirtualClock::new();
        let executor = Executor::new(clock.clone());
        let spawner = Spawner::new(executor.clone());

        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let log = log.clone();
            let clock = clock.clone();
            spawner.spawn(async move {
                log.borrow_mut().push("a0");
                clock.sleep(10).await;
                log.borrow_mut().push("a1");
            });
        }
        {
            let log = log.clone();
            let clock = clock.clone();
            spawner.spawn(async move {
                log.borrow_mut().push("b0");
                clock.sleep(5).await;
                log.borrow_mut().push("b1");
            });
        }

        executor.run_to(1000);

        assert_eq!(*log.borrow(), vec!["a0", "b0", "b1", "a1"]);
    }

    #[test]
    fn stops_advancing_past_sim_end_without_polling_again() {
        let clock = VirtualClock::new();
        let executor = Executor::new(clock.clone());
        let spawner = Spawner::new(executor.clone());
        let polls_after_end = Rc::new(Cell::new(false));

        {
            let clock = clock.clone();
            let polls_after_end = polls_after_end.clone();
            spawner.spawn(async move {
                loop {
                    clock.sleep(1).await;
                    if clock.now() > 1000 {
                        polls_after_end.set(true);
                    }
                }
            });
        }

        executor.run_to(1000);
        assert!(!polls_after_end.get());
        assert_eq!(clock.now(), 1000);
    }
}
