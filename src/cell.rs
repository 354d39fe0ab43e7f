//! The one-shot slot a stage settles its promise through.

use std::{mem, sync::Arc};

use crate::{
    error::{Error, Outcome},
    sync::{Condvar, Mutex},
};

/// Creates a connected pair of [`Resolver`] and [`Settlement`].
pub(crate) fn cell<T>() -> (Resolver<T>, Settlement<T>) {
    let inner = Arc::new(CellInner {
        state: Mutex::new(CellState::Empty),
        condvar: Condvar::new(),
    });
    (
        Resolver {
            inner: inner.clone(),
            settled: false,
        },
        Settlement { inner },
    )
}

enum CellState<T> {
    Empty,
    Settled(Outcome<T>),
    /// The reader took the outcome or went away. Nothing written after this is observed.
    Drained,
}

struct CellInner<T> {
    state: Mutex<CellState<T>>,
    condvar: Condvar,
}

/// Write half of a settlement cell.
///
/// Settling consumes the [`Resolver`], so a cell can never be written twice. Dropping it unsettled
/// settles the cell with [`Error::Abandoned`], so a reader is never left waiting on a stage that
/// will not run.
pub(crate) struct Resolver<T> {
    inner: Arc<CellInner<T>>,
    settled: bool,
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.inner.state.lock();
        if let CellState::Empty = *state {
            *state = CellState::Settled(Err(Error::Abandoned));
            self.inner.condvar.notify_all();
        }
    }
}

impl<T> Resolver<T> {
    /// Settles the cell with `outcome`.
    ///
    /// Never blocks. If the [`Settlement`] was already dropped, nobody can observe the outcome and
    /// it is handed back instead.
    pub(crate) fn settle(mut self, outcome: Outcome<T>) -> Option<Outcome<T>> {
        self.settled = true;
        let mut state = self.inner.state.lock();
        if let CellState::Drained = *state {
            return Some(outcome);
        }

        *state = CellState::Settled(outcome);
        self.inner.condvar.notify_all();
        None
    }
}

/// Read half of a settlement cell.
///
/// Dropping it without taking a failed outcome logs the error at `warn` level.
pub(crate) struct Settlement<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Drop for Settlement<T> {
    fn drop(&mut self) {
        let previous = mem::replace(&mut *self.inner.state.lock(), CellState::Drained);
        if let CellState::Settled(Err(error)) = previous {
            log::warn!("failed promise dropped without being observed: {error}");
        }
    }
}

impl<T> Settlement<T> {
    /// Blocks until the cell is settled, then drains it.
    pub(crate) fn take(self) -> Outcome<T> {
        let mut state = self.inner.state.lock();
        loop {
            match *state {
                CellState::Empty => state = self.inner.condvar.wait(state),
                CellState::Settled(_) => match mem::replace(&mut *state, CellState::Drained) {
                    CellState::Settled(outcome) => return outcome,
                    CellState::Empty | CellState::Drained => unreachable!(),
                },
                // `take` consumes the only reader.
                CellState::Drained => unreachable!("settlement cell drained twice"),
            }
        }
    }

    /// Tests whether a call to [`Settlement::take`] will block.
    pub(crate) fn will_block(&self) -> bool {
        matches!(*self.inner.state.lock(), CellState::Empty)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::test::{assert_send, capture_warnings, warned, Boom};

    #[test]
    fn settle_then_take() {
        let (resolver, settlement) = cell();
        assert!(settlement.will_block());
        assert!(resolver.settle(Ok(7)).is_none());
        assert!(!settlement.will_block());
        assert_eq!(settlement.take().unwrap(), 7);
    }

    #[test]
    fn take_blocks_until_settled() {
        let (resolver, settlement) = cell();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            resolver.settle(Ok("late"));
        });
        assert_eq!(settlement.take().unwrap(), "late");
        writer.join().unwrap();
    }

    #[test]
    fn failure_is_delivered() {
        let (resolver, settlement) = cell::<()>();
        resolver.settle(Err(Error::rejected(Boom("cell"))));
        let error = settlement.take().unwrap_err();
        assert_eq!(error.downcast_ref::<Boom>(), Some(&Boom("cell")));
    }

    #[test]
    fn dropped_resolver_abandons() {
        let (resolver, settlement) = cell::<()>();
        drop(resolver);
        assert!(!settlement.will_block());
        assert!(matches!(settlement.take(), Err(Error::Abandoned)));
    }

    #[test]
    fn settle_returns_unobserved_outcome() {
        let (resolver, settlement) = cell();
        drop(settlement);
        assert!(matches!(resolver.settle(Ok(())), Some(Ok(()))));
    }

    #[test]
    fn dropping_unread_failure_warns() {
        capture_warnings();
        let (resolver, settlement) = cell::<()>();
        resolver.settle(Err(Error::rejected(Boom("unread cell"))));
        drop(settlement);
        assert!(warned("boom: unread cell"));
    }

    #[test]
    fn taken_failure_does_not_warn() {
        capture_warnings();
        let (resolver, settlement) = cell::<()>();
        resolver.settle(Err(Error::rejected(Boom("taken cell"))));
        assert!(settlement.take().is_err());
        assert!(!warned("boom: taken cell"));
    }

    #[test]
    fn cell_is_send() {
        assert_send::<Resolver<()>>();
        assert_send::<Settlement<()>>();
    }
}
