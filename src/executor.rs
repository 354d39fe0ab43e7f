use std::{fmt, io, sync::Arc, thread};

use crate::pool::{Job, StagePool};

/// Runs the bodies of promise stages.
///
/// Every chain is bound to the executor of its root promise, and all stages derived from that root
/// run on it. The default executor spawns one OS thread per stage; an executor built with
/// [`ExecutorBuilder::threads`] runs stages on a fixed pool instead.
///
/// Executors are cheap to clone. A pool is shut down (and its threads joined) once the last clone
/// and the last chain using it are dropped.
#[derive(Clone, Default)]
pub struct Executor {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Threads { name: Option<Arc<str>> },
    Pool(Arc<StagePool>),
    /// Drops every job unrun.
    #[cfg(test)]
    Discard,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Threads { name: None }
    }
}

impl Executor {
    /// Returns a builder that can be used to configure an [`Executor`].
    #[inline]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder {
            name: None,
            threads: None,
            capacity: 0,
        }
    }

    /// An executor that never runs anything, like a pool that has already shut down.
    #[cfg(test)]
    pub(crate) fn discarding() -> Self {
        Executor {
            kind: Kind::Discard,
        }
    }

    /// Returns `true` if this executor runs stages on a fixed number of threads.
    pub fn is_bounded(&self) -> bool {
        matches!(self.kind, Kind::Pool(_))
    }

    /// Hands `job` to a thread.
    ///
    /// If no thread can take it, the job is dropped unrun. Stage jobs settle their promise as
    /// abandoned and release their pending unit when dropped, so the chain still drains.
    pub(crate) fn execute(&self, job: Job) {
        match &self.kind {
            Kind::Threads { name } => {
                let mut builder = thread::Builder::new();
                if let Some(name) = name {
                    builder = builder.name(name.to_string());
                }
                if let Err(e) = builder.spawn(job) {
                    log::error!("failed to spawn stage thread: {e}");
                }
            }
            Kind::Pool(pool) => {
                if let Err(job) = pool.submit(job) {
                    log::error!("stage pool has shut down, dropping stage");
                    drop(job);
                }
            }
            #[cfg(test)]
            Kind::Discard => drop(job),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Threads { name } => f
                .debug_struct("Executor")
                .field("name", name)
                .field("threads", &"per-stage")
                .finish(),
            Kind::Pool(pool) => f
                .debug_struct("Executor")
                .field("threads", &pool.threads())
                .finish_non_exhaustive(),
            #[cfg(test)]
            Kind::Discard => f.write_str("Executor(discarding)"),
        }
    }
}

/// A builder object that can be used to configure an [`Executor`].
#[derive(Clone)]
pub struct ExecutorBuilder {
    name: Option<String>,
    threads: Option<usize>,
    capacity: usize,
}

impl ExecutorBuilder {
    /// Sets the name of the stage threads.
    ///
    /// Pool threads are named after this base name and their index.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Runs stages on a fixed pool of `threads` threads instead of one thread per stage.
    ///
    /// Stages are started in the order they are registered, so an upstream stage is always
    /// running (or done) before anything waiting on it occupies a thread. A stage that itself
    /// blocks on *another* chain running on the same pool (for example by calling
    /// [`Promise::wait`][crate::Promise::wait] inside a callable) holds its thread while doing so,
    /// so the pool must be larger than the deepest such nesting.
    ///
    /// # Panics
    ///
    /// [`ExecutorBuilder::build`] panics if `threads` is 0.
    #[inline]
    pub fn threads(self, threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..self
        }
    }

    /// Sets the number of stages that can be queued for a pool before registering another one
    /// blocks.
    ///
    /// By default, a capacity of 0 is used, which means that registering a stage blocks until a
    /// pool thread is free to start it. Has no effect without [`ExecutorBuilder::threads`].
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    /// Creates the [`Executor`], spawning the pool threads if one was requested.
    pub fn build(self) -> io::Result<Executor> {
        let kind = match self.threads {
            Some(count) => Kind::Pool(Arc::new(StagePool::spawn(
                self.name.as_deref(),
                count,
                self.capacity,
            )?)),
            None => Kind::Threads {
                name: self.name.map(Into::into),
            },
        };
        Ok(Executor { kind })
    }
}
