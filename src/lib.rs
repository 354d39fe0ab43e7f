//! Thread-backed promises with chained `then`/`catch`/`finally` stages.
//!
//! (if you're running large numbers of I/O tasks concurrently, an `async` runtime is probably a
//! better fit; this library is for code that wants JavaScript-style promise chains on plain OS
//! threads, without an event loop)
//!
//! # Overview
//!
//! A [`Promise`] is a one-shot container for a value that some concurrently running *stage*
//! computes. Promises are created with [`from_value`] or [`from_callable`], and extended into
//! *chains* with [`then`] and [`catch`]. Every stage runs on its own thread (or on a bounded pool,
//! see [`Executor`]) and blocks until the stage before it has settled.
//!
//! ## Errors
//!
//! A stage fails by returning `Err`. The error then skips every following `then` stage until a
//! `catch` stage handles it, exactly like a rejected JavaScript promise. Panics inside a stage are
//! turned into [`Error::Panicked`] and travel down the chain the same way.
//!
//! An error must not go unnoticed: a chain ending in a terminal stage that can't deliver errors
//! ([`Promise::then`], [`Promise::finally`], [`Promise::exec`]) panics with an *unhandled
//! rejection* diagnostic if it fails. [`Promise::wait`] is the way to receive the error as a value
//! instead.
//!
//! ## Chains
//!
//! All promises derived from one root share a [`Chain`]: a registration gate and a counter of
//! unfinished stages. Waiting on any promise of a chain waits for every stage registered on it.
//! The terminal stages return the [`Chain`] itself, which blocks until the chain has run when it
//! is dropped, so no stage outlives the code that started it unless it is explicitly
//! [detached][Chain::detach].
//!
//! # Usage
//!
//! Running a function on another thread and transforming its result:
//!
//! ```
//! use promisify::{from_callable, then, Promise};
//!
//! #[derive(Debug, PartialEq)]
//! struct User {
//!     first: String,
//!     last: String,
//! }
//!
//! fn add_user(first: &str, last: &str) -> Result<(String, String), std::io::Error> {
//!     Ok((first.to_string(), last.to_string()))
//! }
//!
//! let p: Promise<(String, String)> = from_callable(add_user, ("Jane", "Doe"));
//! let p = then(p, |(first, last)| Ok::<_, std::io::Error>(User { first, last }));
//!
//! let user = p.wait().unwrap();
//! assert_eq!(user.first, "Jane");
//! ```
//!
//! Recovering from a failure:
//!
//! ```
//! use promisify::{catch, from_fn};
//!
//! let p = from_fn(|| Err::<u32, _>("boom"));
//! let p = catch(p, |error| Ok::<_, std::io::Error>(error.to_string().len() as u32));
//!
//! assert_eq!(p.wait().unwrap(), 4);
//! ```
//!
//! Ending a chain with side effects:
//!
//! ```
//! use promisify::from_value;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! from_value(2)
//!     .and_then(|v| Ok::<_, std::io::Error>(v * 10))
//!     .then(move |v| tx.send(v).unwrap())
//!     .wait();
//!
//! assert_eq!(rx.recv().unwrap(), 20);
//! ```
//!
//! A promise has exactly one consumer. Consuming it twice does not compile:
//!
//! ```compile_fail
//! use promisify::from_value;
//!
//! let p = from_value(1);
//! let value = p.wait();
//! p.exec();
//! ```
//!
//! ```compile_fail
//! use promisify::{from_value, then};
//!
//! let p = from_value(1);
//! let a = then(p, |v| Ok::<_, std::io::Error>(v + 1));
//! let b = then(p, |v| Ok::<_, std::io::Error>(v + 2));
//! ```

mod cell;
mod chain;
mod error;
mod executor;
mod invoke;
mod pool;
mod promise;
mod sync;
#[cfg(test)]
mod test;

pub use chain::Chain;
pub use error::{BoxError, Error, Outcome};
pub use executor::{Executor, ExecutorBuilder};
pub use invoke::Callable;
pub use promise::{catch, from_callable, from_fn, from_value, rejected, then, Promise};
