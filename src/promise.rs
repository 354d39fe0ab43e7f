use std::{fmt, sync::Arc};

use crate::{
    cell::{cell, Resolver, Settlement},
    chain::{Chain, ChainContext},
    error::{escalate, BoxError, Error, Outcome},
    executor::Executor,
    invoke::{guarded, Callable},
};

/// A value of type `T` that becomes available once a concurrently running stage settles it.
///
/// A [`Promise`] is created by one of the constructors ([`from_value`], [`from_callable`],
/// [`from_fn`], [`rejected`]) and consumed by exactly one of:
///
/// - a chain operator ([`then`], [`catch`], or their method forms [`Promise::and_then`] and
///   [`Promise::or_else`]), which yields the next [`Promise`] of the same chain;
/// - a terminal stage ([`Promise::then`], [`Promise::catch`], [`Promise::on_settled`],
///   [`Promise::finally`]), which yields a [`Chain`] handle;
/// - a blocking retrieval ([`Promise::wait`], [`Promise::exec`]).
///
/// Every operation takes the promise by value: its outcome is delivered to one consumer only.
pub struct Promise<T> {
    settlement: Settlement<T>,
    chain: Arc<ChainContext>,
}

/// Creates a promise that is already settled with `value`.
///
/// The promise roots a new chain on the default [`Executor`].
pub fn from_value<T: Send + 'static>(value: T) -> Promise<T> {
    Executor::default().from_value(value)
}

/// Creates a promise settled by calling `f` with `args` on another thread.
///
/// The promise roots a new chain on the default [`Executor`]. See [`Callable`] for the functions
/// that are accepted.
pub fn from_callable<T, Args, F>(f: F, args: Args) -> Promise<T>
where
    T: Send + 'static,
    Args: Send + 'static,
    F: Callable<Args, T>,
{
    Executor::default().from_callable(f, args)
}

/// Creates a promise settled by calling `f` on another thread.
pub fn from_fn<T, E, F>(f: F) -> Promise<T>
where
    T: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    Executor::default().from_fn(f)
}

/// Creates a promise that is already settled with `error`.
pub fn rejected<T: Send + 'static>(error: impl Into<BoxError>) -> Promise<T> {
    Executor::default().rejected(error)
}

/// Chains `f` after `p`.
///
/// Once `p` settles successfully, `f` is called with its value and the returned promise settles
/// with `f`'s result. If `p` failed, `f` is **not** called, and the returned promise fails with
/// the same error. A panic in `f` fails the returned promise with [`Error::Panicked`].
pub fn then<T, S, E, F>(p: Promise<T>, f: F) -> Promise<S>
where
    T: Send + 'static,
    S: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(T) -> Result<S, E> + Send + 'static,
{
    let Promise { settlement, chain } = p;
    let (resolver, next) = cell();
    chain.register("then", move || {
        let outcome = match settlement.take() {
            Ok(value) => guarded(|| f(value).map_err(Error::rejected)),
            Err(error) => {
                log::trace!("then stage skipped, upstream failed: {error}");
                Err(error)
            }
        };
        settle(resolver, outcome);
    });
    Promise {
        settlement: next,
        chain,
    }
}

/// Chains the recovery handler `f` after `p`.
///
/// If `p` failed, `f` is called with the error and the returned promise settles with `f`'s
/// result. If `p` succeeded, `f` is not called and its value is forwarded unchanged (converted
/// with [`Into`], so recovering into a wider type is possible).
pub fn catch<T, S, E, F>(p: Promise<T>, f: F) -> Promise<S>
where
    T: Into<S> + Send + 'static,
    S: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce(Error) -> Result<S, E> + Send + 'static,
{
    let Promise { settlement, chain } = p;
    let (resolver, next) = cell();
    chain.register("catch", move || {
        let outcome = match settlement.take() {
            Ok(value) => Ok(value.into()),
            Err(error) => {
                log::debug!("catch stage handling: {error}");
                guarded(|| f(error).map_err(Error::rejected))
            }
        };
        settle(resolver, outcome);
    });
    Promise {
        settlement: next,
        chain,
    }
}

fn settle<T>(resolver: Resolver<T>, outcome: Outcome<T>) {
    if let Some(Err(error)) = resolver.settle(outcome) {
        log::warn!("promise failed after its handle was dropped: {error}");
    }
}

impl Executor {
    /// Creates a promise that is already settled with `value`, rooting a chain on this executor.
    pub fn from_value<T: Send + 'static>(&self, value: T) -> Promise<T> {
        self.settled(Ok(value))
    }

    /// Creates a promise that is already settled with `error`, rooting a chain on this executor.
    pub fn rejected<T: Send + 'static>(&self, error: impl Into<BoxError>) -> Promise<T> {
        self.settled(Err(Error::rejected(error)))
    }

    /// Creates a promise settled by calling `f` with `args`, rooting a chain on this executor.
    pub fn from_callable<T, Args, F>(&self, f: F, args: Args) -> Promise<T>
    where
        T: Send + 'static,
        Args: Send + 'static,
        F: Callable<Args, T>,
    {
        let chain = ChainContext::new(self.clone());
        let (resolver, settlement) = cell();
        chain.register("callable", move || {
            let outcome = guarded(|| f.call(args));
            settle(resolver, outcome);
        });
        Promise { settlement, chain }
    }

    /// Creates a promise settled by calling `f`, rooting a chain on this executor.
    pub fn from_fn<T, E, F>(&self, f: F) -> Promise<T>
    where
        T: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.from_callable(f, ())
    }

    fn settled<T: Send + 'static>(&self, outcome: Outcome<T>) -> Promise<T> {
        let chain = ChainContext::new(self.clone());
        let (resolver, settlement) = cell();
        resolver.settle(outcome);
        // Settling is immediate, but the chain still gets its own stage like any other root.
        chain.register("settled", || {});
        Promise { settlement, chain }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Method form of [`then`].
    pub fn and_then<S, E, F>(self, f: F) -> Promise<S>
    where
        S: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(T) -> Result<S, E> + Send + 'static,
    {
        then(self, f)
    }

    /// Method form of [`catch`].
    pub fn or_else<S, E, F>(self, f: F) -> Promise<S>
    where
        T: Into<S>,
        S: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(Error) -> Result<S, E> + Send + 'static,
    {
        catch(self, f)
    }

    /// Ends the chain by passing the value to `f`.
    ///
    /// If the promise failed, the error is unhandled: it escalates to a panic on the thread that
    /// waits for (or drops) the returned [`Chain`].
    pub fn then<F>(self, f: F) -> Chain
    where
        F: FnOnce(T) + Send + 'static,
    {
        let Promise { settlement, chain } = self;
        chain.register_terminal("terminal then", move || match settlement.take() {
            Ok(value) => f(value),
            Err(error) => escalate(error),
        });
        Chain::new(chain)
    }

    /// Ends the chain by passing the error to `f`, if there is one.
    ///
    /// A successful value is dropped.
    pub fn catch<F>(self, f: F) -> Chain
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let Promise { settlement, chain } = self;
        chain.register_terminal("terminal catch", move || {
            if let Err(error) = settlement.take() {
                f(error);
            }
        });
        Chain::new(chain)
    }

    /// Ends the chain by passing the value to `on_ok`, or the error to `on_err`.
    pub fn on_settled<F, G>(self, on_ok: F, on_err: G) -> Chain
    where
        F: FnOnce(T) + Send + 'static,
        G: FnOnce(Error) + Send + 'static,
    {
        let Promise { settlement, chain } = self;
        chain.register_terminal("on_settled", move || match settlement.take() {
            Ok(value) => on_ok(value),
            Err(error) => on_err(error),
        });
        Chain::new(chain)
    }

    /// Ends the chain by running `f` once the promise has settled.
    ///
    /// The value is dropped. If the promise failed, the error is unhandled and escalates (see
    /// [`Promise::then`]) *instead* of running `f`; put a [`catch`] stage in front to run `f` on
    /// both paths.
    pub fn finally<F>(self, f: F) -> Chain
    where
        F: FnOnce() + Send + 'static,
    {
        let Promise { settlement, chain } = self;
        chain.register_terminal("finally", move || {
            if let Err(error) = settlement.take() {
                escalate(error);
            }
            f();
        });
        Chain::new(chain)
    }

    /// Blocks until the whole chain has run, and drops the value.
    ///
    /// # Panics
    ///
    /// Panics with an unhandled-rejection diagnostic if the promise failed.
    pub fn exec(self) {
        self.chain.wait_idle();
        if let Err(error) = self.settlement.take() {
            escalate(error);
        }
    }

    /// Blocks until the whole chain has run, and returns the outcome.
    ///
    /// This is the only way to end a chain that hands a failure back to the caller instead of
    /// escalating it.
    pub fn wait(self) -> Result<T, Error> {
        self.chain.wait_idle();
        self.settlement.take()
    }

    /// Returns `true` if the promise has settled, so that [`Promise::wait`] only waits for the
    /// rest of the chain.
    pub fn is_settled(&self) -> bool {
        !self.settlement.will_block()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &!self.settlement.will_block())
            .field("pending", &self.chain.pending())
            .finish_non_exhaustive()
    }
}
