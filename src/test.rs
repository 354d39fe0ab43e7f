//! Internal unit test utilities.

use std::{fmt, panic::resume_unwind};

use crate::sync::Mutex;

/// A domain error used by the unit tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boom(pub &'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

/// Panics without invoking the panic hook, to keep test output readable.
pub fn silent_panic(payload: &str) -> ! {
    resume_unwind(Box::new(payload.to_string()));
}

pub fn assert_send<T: Send>() {}

static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct WarningCapture;

impl log::Log for WarningCapture {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            WARNINGS.lock().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs a logger that records every `warn` and `error` message.
///
/// Tests share the logger, so they should look for a message unique to them with [`warned`].
pub fn capture_warnings() {
    static CAPTURE: WarningCapture = WarningCapture;
    if log::set_logger(&CAPTURE).is_ok() {
        log::set_max_level(log::LevelFilter::Warn);
    }
}

/// Returns `true` if a captured message contains `needle`.
pub fn warned(needle: &str) -> bool {
    WARNINGS.lock().iter().any(|message| message.contains(needle))
}
