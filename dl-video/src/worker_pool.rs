//! Fixed worker pool with a scatter-gather barrier
//!
//! A small set of long-lived threads fed by a crossbeam channel. A batch of
//! chunk tasks is fanned out and the caller blocks on a `WaitGroup` until
//! every task has finished; there is no fire-and-forget path.

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use std::thread::{self, JoinHandle};

/// Cores left free for the capture callback and the host application.
const RESERVED_CORES: usize = 2;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    task_tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
    pin_workers: bool,
}

impl WorkerPool {
    /// Create a pool of `size` workers. A size of zero is normalized to one.
    pub fn new(size: usize) -> Self {
        Self::with_pinning(size, false)
    }

    /// Like [`new`](Self::new), optionally pinning each worker to a core
    /// past the reserved ones.
    pub fn with_pinning(size: usize, pin_workers: bool) -> Self {
        let size = size.max(1);
        let (task_tx, task_rx) = channel::unbounded();
        let workers = Self::spawn_workers(size, pin_workers, task_rx);

        log::info!("conversion pool started with {size} workers (pinned: {pin_workers})");

        WorkerPool {
            task_tx: Some(task_tx),
            workers,
            size,
            pin_workers,
        }
    }

    /// Pool size derived from available parallelism, minus the cores
    /// reserved for capture and the host application.
    pub fn default_size() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .saturating_sub(RESERVED_CORES)
            .max(1)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fan a batch of tasks out to the workers and block until all of them
    /// have completed. Tasks must not panic; a panicking task poisons its
    /// worker thread.
    pub fn run_batch<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        let tx = self
            .task_tx
            .as_ref()
            .expect("worker pool already shut down");

        let wg = WaitGroup::new();
        for task in tasks {
            let wg = wg.clone();
            tx.send(Box::new(move || {
                task();
                drop(wg);
            }))
            .expect("worker pool channel closed");
        }
        wg.wait();
    }

    /// Resize the pool. Permitted only while idle; exclusive access plus
    /// the synchronous barrier in [`run_batch`](Self::run_batch) guarantee
    /// no batch is in flight.
    pub fn set_size(&mut self, size: usize) {
        let size = size.max(1);
        if size == self.size {
            return;
        }

        log::info!("resizing conversion pool from {} to {size} workers", self.size);

        // dropping the sender lets the current workers drain and exit
        self.task_tx = None;
        for handle in self.workers.drain(..) {
            handle.join().ok();
        }

        let (task_tx, task_rx) = channel::unbounded();
        self.workers = Self::spawn_workers(size, self.pin_workers, task_rx);
        self.task_tx = Some(task_tx);
        self.size = size;
    }

    fn spawn_workers(
        size: usize,
        pin_workers: bool,
        task_rx: Receiver<Task>,
    ) -> Vec<JoinHandle<()>> {
        let core_ids = if pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        (0..size)
            .map(|i| {
                let task_rx = task_rx.clone();
                let core = if core_ids.is_empty() {
                    None
                } else {
                    Some(core_ids[(RESERVED_CORES + i) % core_ids.len()])
                };

                thread::Builder::new()
                    .name(format!("dl-convert-{i}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            if !core_affinity::set_for_current(core) {
                                log::warn!("failed to pin conversion worker {i}");
                            }
                        }
                        while let Ok(task) = task_rx.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn conversion worker")
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.task_tx = None;
        for handle in self.workers.drain(..) {
            handle.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_size_normalized_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_default_size_at_least_one() {
        assert!(WorkerPool::default_size() >= 1);
    }

    #[test]
    fn test_batch_runs_every_task() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();

        pool.run_batch(tasks);
        // the barrier returned, so every task must have run
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_barrier_waits_for_slow_tasks() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    thread::sleep(Duration::from_millis(20));
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();

        pool.run_batch(tasks);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_resize_while_idle() {
        let mut pool = WorkerPool::new(2);
        pool.set_size(4);
        assert_eq!(pool.size(), 4);

        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();
        pool.run_batch(tasks);
        assert_eq!(counter.load(Ordering::SeqCst), 8);

        pool.set_size(0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_empty_batch_returns_immediately() {
        let pool = WorkerPool::new(2);
        pool.run_batch(Vec::new());
    }
}
