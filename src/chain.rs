//! State shared by every promise derived from one root.

use std::{
    any::Any,
    fmt,
    panic::{self, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use crate::{
    error::panic_message,
    executor::Executor,
    sync::{Condvar, Mutex},
};

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(0);

/// The gate, pending counter and fault slot of one chain.
pub(crate) struct ChainContext {
    id: u64,
    /// Held while a stage is registered. Counts the stages registered so far.
    gate: Mutex<u64>,
    /// Stages registered but not yet finished.
    pending: Mutex<usize>,
    /// Signaled when `pending` drops to 0.
    idle: Condvar,
    /// First panic raised by a terminal stage, re-raised on the thread waiting for the chain.
    fault: Mutex<Option<Box<dyn Any + Send>>>,
    executor: Executor,
}

impl ChainContext {
    pub(crate) fn new(executor: Executor) -> Arc<Self> {
        let id = NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("chain {id} created on {executor:?}");
        Arc::new(Self {
            id,
            gate: Mutex::new(0),
            pending: Mutex::new(0),
            idle: Condvar::new(),
            fault: Mutex::new(None),
            executor,
        })
    }

    /// Registers one pending stage and hands `body` to the chain's executor.
    ///
    /// The pending unit is counted before the executor sees the job, so a concurrent
    /// [`ChainContext::wait_idle`] can never observe an idle chain with a stage still to run. The
    /// unit is released when the job finishes or when it is dropped without running.
    pub(crate) fn register<F>(self: &Arc<Self>, label: &'static str, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut gate = self.gate.lock();
        let stage = *gate;
        *gate += 1;
        *self.pending.lock() += 1;

        let unit = PendingUnit {
            chain: self.clone(),
            stage,
            label,
        };
        log::trace!("chain {} registered {label} stage {stage}", self.id);
        self.executor.execute(Box::new(move || {
            log::trace!("chain {} running {label} stage {stage}", unit.chain.id);
            body();
            drop(unit);
        }));
        drop(gate);
    }

    /// Like [`ChainContext::register`], for stages that have no promise to fail.
    ///
    /// A panic in `body` (including an unhandled-rejection escalation) is stored and re-raised by
    /// whoever waits for the chain through a [`Chain`] handle.
    pub(crate) fn register_terminal<F>(self: &Arc<Self>, label: &'static str, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let chain = self.clone();
        self.register(label, move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                chain.record_fault(label, payload);
            }
        });
    }

    /// Blocks until every registered stage has finished.
    pub(crate) fn wait_idle(&self) {
        drop(self.idle.wait_while(self.pending.lock(), |pending| *pending != 0));
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.lock()
    }

    fn complete(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn record_fault(&self, label: &str, payload: Box<dyn Any + Send>) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            log::debug!("chain {}: {label} stage faulted", self.id);
            *fault = Some(payload);
        } else {
            // Only the first fault is propagated.
            log::error!(
                "chain {}: {label} stage faulted again: {}",
                self.id,
                panic_message(&*payload)
            );
        }
    }

    fn take_fault(&self) -> Option<Box<dyn Any + Send>> {
        self.fault.lock().take()
    }
}

/// One registered stage. Dropping it marks the stage as finished.
struct PendingUnit {
    chain: Arc<ChainContext>,
    stage: u64,
    label: &'static str,
}

impl Drop for PendingUnit {
    fn drop(&mut self) {
        log::trace!(
            "chain {} finished {} stage {}",
            self.chain.id,
            self.label,
            self.stage
        );
        self.chain.complete();
    }
}

/// A handle to a chain that was ended by a terminal stage.
///
/// Returned by [`Promise::then`][crate::Promise::then], [`Promise::catch`][crate::Promise::catch],
/// [`Promise::on_settled`][crate::Promise::on_settled] and
/// [`Promise::finally`][crate::Promise::finally].
///
/// This type enforces structured concurrency: when it's dropped, the calling thread blocks until
/// every stage of the chain has run. If a terminal stage panicked, or escalated an unhandled
/// rejection, the panic is forwarded to the thread waiting on (or dropping) the [`Chain`].
pub struct Chain {
    ctx: Option<Arc<ChainContext>>,
}

impl Chain {
    pub(crate) fn new(ctx: Arc<ChainContext>) -> Self {
        Self { ctx: Some(ctx) }
    }

    /// Blocks until every stage registered on the chain has finished.
    ///
    /// If a terminal stage panicked, the panic is propagated to the calling thread.
    pub fn wait(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.wait_idle();
            if let Some(payload) = ctx.take_fault() {
                resume_unwind(payload);
            }
        }
    }

    /// Returns the number of stages that have not finished yet.
    pub fn pending(&self) -> usize {
        self.ctx.as_ref().map_or(0, |ctx| ctx.pending())
    }

    /// Returns `true` if every stage of the chain has finished.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Lets the chain run to completion in the background without waiting for it.
    ///
    /// Faults raised by a detached chain are still logged, but nobody receives them.
    pub fn detach(mut self) {
        if let Some(ctx) = self.ctx.take() {
            log::trace!("chain {} detached", ctx.id);
        }
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.wait_idle();
            if let Some(payload) = ctx.take_fault() {
                if thread::panicking() {
                    log::error!(
                        "chain {} faulted during unwinding: {}",
                        ctx.id,
                        panic_message(&*payload)
                    );
                } else {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.ctx.as_ref().map(|ctx| ctx.id))
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::catch_unwind,
        sync::atomic::{AtomicBool, AtomicUsize},
        time::Duration,
    };

    use crossbeam_channel::bounded;

    use super::*;
    use crate::test::{assert_send, silent_panic};

    #[test]
    fn wait_idle_covers_every_stage() {
        let ctx = ChainContext::new(Executor::default());
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = done.clone();
            ctx.register("test", move || {
                thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        ctx.wait_idle();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn pending_counts_before_stage_runs() {
        let ctx = ChainContext::new(Executor::default());
        let (release, gate) = bounded::<()>(0);
        ctx.register("test", move || gate.recv().unwrap());
        assert_eq!(ctx.pending(), 1);
        release.send(()).unwrap();
        ctx.wait_idle();
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn chain_handle_forwards_terminal_panic() {
        let ctx = ChainContext::new(Executor::default());
        ctx.register_terminal("test", || silent_panic("terminal panic"));
        let chain = Chain::new(ctx);
        let payload = catch_unwind(AssertUnwindSafe(|| chain.wait())).unwrap_err();
        assert_eq!(panic_message(&*payload), "terminal panic");
        // The fault was delivered once; dropping the handle must not raise it again.
        drop(chain);
    }

    #[test]
    fn dropping_chain_waits() {
        let ctx = ChainContext::new(Executor::default());
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        ctx.register("test", move || {
            thread::sleep(Duration::from_millis(50));
            r.store(true, Ordering::SeqCst);
        });
        drop(Chain::new(ctx));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn detached_chain_still_runs() {
        let ctx = ChainContext::new(Executor::default());
        let (tx, rx) = bounded(1);
        ctx.register("test", move || tx.send(()).unwrap());
        Chain::new(ctx).detach();
        rx.recv().unwrap();
    }

    #[test]
    fn unrun_stage_releases_pending_unit() {
        let ctx = ChainContext::new(Executor::discarding());
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        ctx.register("test", move || r.store(true, Ordering::SeqCst));
        assert_eq!(ctx.pending(), 0);

        let chain = Chain::new(ctx);
        assert!(chain.is_idle());
        chain.wait();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn chain_is_send() {
        assert_send::<Chain>();
    }
}
