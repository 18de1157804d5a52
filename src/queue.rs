use std::{cell::RefCell, collections::VecDeque, fmt, future::poll_fn, rc::Rc, task::Context};
use std::{task::Poll, time::Duration};

use ntex_util::{channel::oneshot, task::LocalWaker, time};
use ntex_util::time::{timeout, Millis};

use crate::command::Command;
use crate::packet::Publish;

/// Commands shared by producers, drained by the dispatcher
pub type CommandQueue = Queue<Command>;

/// Delivered publishes for a single subscriber
pub type ResponseQueue = Queue<Publish>;

/// Bounded fifo queue with a single consumer.
///
/// Producers that find the queue full wait for free space up to the
/// given timeout.
pub struct Queue<T>(Rc<Inner<T>>);

struct Inner<T> {
    cap: usize,
    items: RefCell<VecDeque<T>>,
    waiters: RefCell<VecDeque<oneshot::Sender<()>>>,
    task: LocalWaker,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue(self.0.clone())
    }
}

impl<T> PartialEq for Queue<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Queue<T> {}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("cap", &self.0.cap).field("len", &self.len()).finish()
    }
}

impl<T> Queue<T> {
    /// Create queue, capacity must be non zero
    pub fn new(cap: usize) -> Self {
        Queue(Rc::new(Inner {
            cap: std::cmp::max(cap, 1),
            items: RefCell::new(VecDeque::with_capacity(cap)),
            waiters: RefCell::new(VecDeque::new()),
            task: LocalWaker::new(),
        }))
    }

    pub fn capacity(&self) -> usize {
        self.0.cap
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.0.cap
    }

    /// Push item to the tail, fails if queue is full
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.insert(item, false)
    }

    /// Push item to the head, fails if queue is full
    pub fn try_push_front(&self, item: T) -> Result<(), T> {
        self.insert(item, true)
    }

    /// Push item to the tail, wait up to `timeout` for free space
    pub async fn push(&self, item: T, timeout: Millis) -> Result<(), T> {
        self.push_timeout(item, timeout, false).await
    }

    /// Push item to the head, wait up to `timeout` for free space
    pub async fn push_front(&self, item: T, timeout: Millis) -> Result<(), T> {
        self.push_timeout(item, timeout, true).await
    }

    /// Take item from the head
    pub fn try_recv(&self) -> Option<T> {
        let item = self.0.items.borrow_mut().pop_front();
        if item.is_some() {
            self.notify_waiter();
        }
        item
    }

    /// Take item from the head, wait up to `timeout` for one
    pub async fn recv(&self, dur: Millis) -> Option<T> {
        timeout(dur, poll_fn(|cx| self.poll_recv(cx))).await.ok()
    }

    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(item) = self.try_recv() {
            Poll::Ready(item)
        } else {
            self.0.task.register(cx.waker());
            Poll::Pending
        }
    }

    /// Drop all queued items
    pub fn clear(&self) {
        let items = std::mem::take(&mut *self.0.items.borrow_mut());
        if !items.is_empty() {
            log::trace!("Dropping {} queued items", items.len());
        }
        for _ in 0..items.len() {
            self.notify_waiter();
        }
    }

    fn insert(&self, item: T, front: bool) -> Result<(), T> {
        let mut items = self.0.items.borrow_mut();
        if items.len() >= self.0.cap {
            return Err(item);
        }
        if front {
            items.push_front(item);
        } else {
            items.push_back(item);
        }
        drop(items);
        self.0.task.wake();
        Ok(())
    }

    async fn push_timeout(&self, mut item: T, dur: Millis, front: bool) -> Result<(), T> {
        let deadline = time::now() + Duration::from(dur);
        loop {
            match self.insert(item, front) {
                Ok(()) => return Ok(()),
                Err(it) => item = it,
            }

            let remaining = deadline.saturating_duration_since(time::now());
            if remaining.is_zero() {
                return Err(item);
            }

            let (tx, rx) = oneshot::channel();
            self.0.waiters.borrow_mut().push_back(tx);
            if timeout(Millis::from(remaining), rx).await.is_err() {
                // last chance, consumer could free a slot at deadline
                return self.insert(item, front);
            }
        }
    }

    fn notify_waiter(&self) {
        let mut waiters = self.0.waiters.borrow_mut();
        while let Some(tx) = waiters.pop_front() {
            if tx.send(()).is_ok() {
                break;
            }
        }
    }
}
