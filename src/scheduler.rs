//! Fixed worker pool consuming a FIFO task queue.
//!
//! Workers block on a condition variable until a task arrives or shutdown
//! begins. Shutdown drains the queue: workers finish every task enqueued
//! before the stop flag was set, then exit. Tasks cannot be added once
//! shutdown has begun.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    stop: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// A fixed-size worker pool. The server enqueues one task per accepted
/// connection; workers run them to completion in FIFO order.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
        });

        let handles = (0..workers.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Adds a task and wakes one worker. Returns false once shutdown has
    /// begun; the task is dropped in that case.
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.stop {
                return false;
            }
            queue.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        true
    }

    /// Stops accepting tasks, lets the workers drain the queue, and joins
    /// them. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop = true;
        }
        self.shared.available.notify_all();

        for handle in self.workers.lock().unwrap().drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("worker panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.stop {
                    return;
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };
        // Run outside the lock so other workers keep pulling tasks.
        task();
    }
}
