//! Turning user functions into stage computations.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{BoxError, Error, Outcome};

/// A function that can root a promise chain via [`from_callable`][crate::from_callable].
///
/// `Args` is the tuple of arguments the function is invoked with, and `T` is the value it produces
/// on success. This is implemented for every `FnOnce(A, B, ..) -> Result<T, E>` taking up to six
/// arguments, where `E` is any error convertible into a [`BoxError`] (any `std::error::Error + Send
/// + Sync`, `String` and `&str` included).
///
/// Arguments are passed as a tuple, so a one-argument function takes `(arg,)`:
///
/// ```
/// use promisify::{from_callable, Promise};
///
/// fn shout(word: &str) -> Result<String, std::fmt::Error> {
///     Ok(word.to_uppercase())
/// }
///
/// let p: Promise<String> = from_callable(shout, ("hey",));
/// assert_eq!(p.wait().unwrap(), "HEY");
/// ```
///
/// A function of the wrong arity, a mismatched argument type or a return value that isn't a
/// `Result<T, _>` is rejected at compile time:
///
/// ```compile_fail
/// use promisify::{from_callable, Promise};
///
/// fn add(a: i32, b: i32) -> Result<i32, std::fmt::Error> {
///     Ok(a + b)
/// }
///
/// let p: Promise<i32> = from_callable(add, (1, "two"));
/// ```
pub trait Callable<Args, T>: Send + 'static {
    /// Invokes the function with `args`.
    fn call(self, args: Args) -> Result<T, Error>;
}

macro_rules! impl_callable {
    ($($arg:ident),*) => {
        impl<F, T, E, $($arg,)*> Callable<($($arg,)*), T> for F
        where
            F: FnOnce($($arg),*) -> Result<T, E> + Send + 'static,
            E: Into<BoxError>,
        {
            #[allow(non_snake_case)]
            fn call(self, ($($arg,)*): ($($arg,)*)) -> Result<T, Error> {
                self($($arg),*).map_err(Error::rejected)
            }
        }
    };
}

impl_callable!();
impl_callable!(A0);
impl_callable!(A0, A1);
impl_callable!(A0, A1, A2);
impl_callable!(A0, A1, A2, A3);
impl_callable!(A0, A1, A2, A3, A4);
impl_callable!(A0, A1, A2, A3, A4, A5);

/// Runs a stage computation, turning a panic into [`Error::Panicked`].
pub(crate) fn guarded<T, F>(f: F) -> Outcome<T>
where
    F: FnOnce() -> Outcome<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(Error::from_panic(payload)),
    }
}
