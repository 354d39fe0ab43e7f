use std::{any::Any, error::Error as StdError};

/// A type-erased domain error, as returned by callables and stage handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The settled state of a promise: either its value, or the error it failed with.
pub type Outcome<T> = Result<T, Error>;

/// The failure half of a settled [`Promise`][crate::Promise].
///
/// Errors returned by callables and handlers travel down a chain as [`Error::Rejected`], skipping
/// every `then` stage until a `catch` stage consumes them or
/// [`Promise::wait`][crate::Promise::wait] hands them to the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A callable or handler returned an error.
    #[error(transparent)]
    Rejected(BoxError),

    /// A stage body panicked while computing its value.
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// The stage responsible for settling the promise was dropped without running.
    #[error("stage was dropped before it settled its promise")]
    Abandoned,
}

impl Error {
    /// Wraps a domain error.
    ///
    /// If `error` already is an [`Error`] (for example, a `catch` handler re-raising the error it
    /// was given), it is returned as-is instead of being nested.
    pub fn rejected<E: Into<BoxError>>(error: E) -> Self {
        let boxed: BoxError = error.into();
        match boxed.downcast::<Error>() {
            Ok(error) => *error,
            Err(other) => Error::Rejected(other),
        }
    }

    /// Returns a reference to the domain error if it is of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Error::Rejected(inner) => inner.downcast_ref(),
            _ => None,
        }
    }

    /// Returns `true` if this error was produced by a panicking stage.
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panicked(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Error::Panicked(panic_message(&*payload))
    }
}

/// Diagnostic raised when a failed promise reaches a terminal stage that cannot deliver errors.
#[derive(Debug, thiserror::Error)]
#[error("unhandled promise rejection: {error} (add a `catch` stage, or use `wait` to receive the error)")]
pub(crate) struct UnhandledRejection {
    error: Error,
}

/// Logs `error` and panics with an [`UnhandledRejection`] diagnostic.
///
/// On a stage thread the panic is captured by the chain and re-raised on the thread that waits for
/// it; on the caller's thread (`exec`) it unwinds right away.
pub(crate) fn escalate(error: Error) -> ! {
    let rejection = UnhandledRejection { error };
    log::error!("{rejection}");
    panic!("{rejection}");
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use super::*;
    use crate::test::Boom;

    #[test]
    fn rejected_does_not_nest() {
        let inner = Error::rejected(Boom("nested"));
        let outer = Error::rejected(inner);
        assert_eq!(outer.downcast_ref::<Boom>(), Some(&Boom("nested")));
    }

    #[test]
    fn rejected_from_str() {
        let error = Error::rejected("plain message");
        assert_eq!(error.to_string(), "plain message");
        assert!(error.downcast_ref::<Boom>().is_none());
    }

    #[test]
    fn panic_payloads() {
        let payload = catch_unwind(|| panic!("static str")).unwrap_err();
        assert_eq!(Error::from_panic(payload).to_string(), "stage panicked: static str");

        let payload = catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        let error = Error::from_panic(payload);
        assert!(error.is_panic());
        assert_eq!(error.to_string(), "stage panicked: formatted 42");
    }

    #[test]
    fn escalation_message_names_error() {
        let payload = catch_unwind(|| escalate(Error::rejected(Boom("lost")))).unwrap_err();
        let message = panic_message(&*payload);
        assert!(message.contains("unhandled promise rejection: boom: lost"));
        assert!(message.contains("`catch`"));
    }
}
