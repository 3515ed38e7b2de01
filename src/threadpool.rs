//! Fixed set of worker threads draining a bounded FIFO.
//!
//! `submit` never blocks: when `max_queued` tasks are already waiting the
//! task is handed back inside `QueueFull` and the caller decides what to do
//! with it.

use crate::error::PoolError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// A rejected submission. Carries the task back to the caller.
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

struct State<T> {
    tasks: VecDeque<T>,
    closed: bool,
}

pub struct TaskQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    max: usize,
}

impl<T> TaskQueue<T> {
    pub fn new(max: usize) -> Result<Self, PoolError> {
        if max == 0 {
            return Err(PoolError::InvalidQueueBound);
        }
        Ok(Self {
            state: Mutex::new(State { tasks: VecDeque::new(), closed: false }),
            ready: Condvar::new(),
            max,
        })
    }

    /// Accepts while fewer than `max` tasks are waiting.
    pub fn push(&self, task: T) -> Result<(), QueueFull<T>> {
        let mut state = self.state.lock();
        if state.closed || state.tasks.len() >= self.max {
            return Err(QueueFull(task));
        }
        state.tasks.push_back(task);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks until a task is available. `None` once the queue is closed;
    /// tasks still waiting at that point are dropped.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            self.ready.wait(&mut state);
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max
    }
}

pub struct ThreadPool<T: Send + 'static> {
    queue: Arc<TaskQueue<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub fn new<F>(threads: usize, max_queued: usize, handler: F) -> Result<Self, PoolError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(PoolError::InvalidThreadCount);
        }
        let queue = Arc::new(TaskQueue::new(max_queued)?);
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker_queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("vrypt-worker-{i}"))
                .spawn(move || {
                    while let Some(task) = worker_queue.pop() {
                        handler(task);
                    }
                    debug!(worker = i, "worker exiting");
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(e));
                }
            }
        }
        info!(threads, max_queued, "thread pool started");

        Ok(Self { queue, workers })
    }

    #[inline]
    pub fn submit(&self, task: T) -> Result<(), QueueFull<T>> {
        self.queue.push(task)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        self.queue.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn construction_rejects_zero_sizes() {
        assert!(matches!(
            ThreadPool::new(0, 10, |_: u32| {}),
            Err(PoolError::InvalidThreadCount)
        ));
        assert!(matches!(
            ThreadPool::new(2, 0, |_: u32| {}),
            Err(PoolError::InvalidQueueBound)
        ));
    }

    #[test]
    fn queue_rejects_past_capacity_without_blocking() {
        let queue = TaskQueue::new(3).unwrap();
        for i in 0..3 {
            assert!(queue.push(i).is_ok());
        }
        let rejected = queue.push(99).unwrap_err();
        assert_eq!(rejected.into_inner(), 99);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(0));
        assert!(queue.push(4).is_ok());
    }

    #[test]
    fn closed_queue_refuses_and_wakes_poppers() {
        let queue = Arc::new(TaskQueue::<u8>::new(1).unwrap());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(queue.push(1).is_err());
    }

    #[test]
    fn workers_run_every_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let counter = Arc::clone(&done);
        let pool = ThreadPool::new(4, 1000, move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
            let _ = tx.lock().send(());
        })
        .unwrap();
        assert_eq!(pool.threads(), 4);

        for _ in 0..100 {
            pool.submit(1).unwrap();
        }
        for _ in 0..100 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn excess_submissions_fail_while_workers_are_busy() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let gate_rx = Mutex::new(gate_rx);
        let pool = ThreadPool::new(1, 2, move |n: u32| {
            let _ = started_tx.lock().send(n);
            let _ = gate_rx.lock().recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        pool.submit(0).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

        assert!(pool.submit(1).is_ok());
        assert!(pool.submit(2).is_ok());
        let rejected = pool.submit(3).unwrap_err();
        assert_eq!(rejected.into_inner(), 3);
        assert_eq!(pool.queued(), 2);

        for _ in 0..3 {
            let _ = gate_tx.send(());
        }
    }
}
