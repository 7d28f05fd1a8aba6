//! Unbounded single-consumer FIFO queue used for node rx mailboxes.
//!
//! The spec models "awaiting enqueue into rx queue" as a suspension point;
//! this is the minimal async-aware primitive that provides it without
//! pulling in a full channel crate. It is intentionally unbounded: nothing
//! in the spec describes backpressure on node mailboxes, and the wireless
//! channel's own `busy_until` reservation is the only admission control
//! that matters (§4.3).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<Waker>,
}

/// A cloneable handle to a FIFO mailbox. Clones share the same underlying
/// queue (`Rc`), matching how a node's six tasks all need a handle onto the
/// same rx mailbox without any of them owning it outright.
pub struct Queue<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue {
            inner: Rc::new(RefCell::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Enqueue an item and wake the oldest waiting receiver, if any.
    pub fn send(&self, item: T) {
        let mut inner = self.inner.borrow_mut();
        inner.items.push_back(item);
        if let Some(waker) = inner.waiters.pop_front() {
            drop(inner);
            waker.wake();
        }
    }

    pub fn recv(&self) -> Recv<T> {
        Recv {
            queue: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Recv<T> {
    queue: Queue<T>,
}

impl<T> Future for Recv<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.queue.inner.borrow_mut();
        match inner.items.pop_front() {
            Some(item) => Poll::Ready(item),
            None => {
                inner.waiters.push_back(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Context;

    #[test]
    fn recv_resolves_immediately_when_item_already_present() {
        let q: Queue<u32> = Queue::new();
        q.send(7);
        let mut fut = Box::pin(q.recv());
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(7));
    }

    #[test]
    fn send_wakes_a_pending_receiver() {
        use std::sync::{Arc, Mutex};

        struct Flag(Arc<Mutex<bool>>);
        impl futures::task::ArcWake for Flag {
            fn wake_by_ref(arc_self: &Arc<Self>) {
                *arc_self.0.lock().unwrap() = true;
            }
        }

        let q: Queue<u32> = Queue::new();
        let mut fut = Box::pin(q.recv());
        let woken = Arc::new(Mutex::new(false));
        let waker = futures::task::waker(Arc::new(Flag(woken.clone())));
        let mut cx = Context::from_waker(&waker);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);

        q.send(42);
        assert!(*woken.lock().unwrap());
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(42));
    }
}
