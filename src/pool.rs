use std::{
    io,
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
};

use crossbeam_channel::Sender;

use crate::error::panic_message;

/// A unit of stage work handed to an executor.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of threads that run stage jobs in submission order.
///
/// Submission blocks while the queue is full, which is what applies back-pressure to code that
/// builds chains faster than they can run. Dropping the pool closes the queue, lets the workers
/// finish the jobs already queued, and joins them.
pub(crate) struct StagePool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl StagePool {
    pub(crate) fn spawn(name: Option<&str>, count: usize, capacity: usize) -> io::Result<Self> {
        assert_ne!(count, 0, "a stage pool needs at least 1 thread");

        let (sender, recv) = crossbeam_channel::bounded::<Job>(capacity);
        // Built incrementally so that a failed spawn still joins the threads started before it.
        let mut pool = StagePool {
            sender: Some(sender),
            handles: Vec::with_capacity(count),
        };
        for i in 0..count {
            let mut builder = thread::Builder::new();
            if let Some(name) = name {
                builder = builder.name(format!("{name}-{i}"));
            }
            let recv = recv.clone();
            let handle = builder.spawn(move || {
                for job in recv {
                    // Stage jobs guard themselves; this only keeps the worker alive if one doesn't.
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        log::error!("stage job panicked: {}", panic_message(&*payload));
                    }
                }
            })?;
            pool.handles.push(handle);
        }
        log::trace!("stage pool started with {count} threads");

        Ok(pool)
    }

    /// Queues `job`, blocking while the queue is full.
    ///
    /// Gives the job back if every worker has exited.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|err| err.into_inner()),
            None => Err(job),
        }
    }

    pub(crate) fn threads(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for StagePool {
    fn drop(&mut self) {
        // Close the channel to signal the threads to exit.
        drop(self.sender.take());

        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            // The last reference can be released by a job running on one of our own workers.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("stage pool worker exited by panicking");
            }
        }
        log::trace!("stage pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn runs_submitted_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = StagePool::spawn(Some("pool-test"), 3, 0).unwrap();
        assert_eq!(pool.threads(), 3);
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_or_else(|_| panic!("stage pool rejected the job"));
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn worker_survives_panicking_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = StagePool::spawn(None, 1, 0).unwrap();
        pool.submit(Box::new(|| {
            crate::test::silent_panic("job panic");
        }))
        .unwrap_or_else(|_| panic!("stage pool rejected the job"));
        let c = counter.clone();
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap_or_else(|_| panic!("stage pool rejected the job"));
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "at least 1 thread")]
    fn zero_threads_rejected() {
        let _ = StagePool::spawn(None, 0, 0);
    }
}
