//! Current-time provider for send-rate bookkeeping.
//!
//! Production code uses [`SystemClock`]. Tests use [`mock::MockClock`], which
//! is compiled for this crate's tests and for dependents that enable the
//! `test-helpers` feature.

use std::time::Instant;

/// Port for reading the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// System clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock {
    use super::Clock;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Controllable clock. Clones share the same current time, so a test can
    /// keep one handle and hand another to the code under test.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current_time: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        pub fn new(start: Instant) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, duration: Duration) {
            *self.current_time.lock() += duration;
        }

        pub fn set(&self, instant: Instant) {
            *self.current_time.lock() = instant;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current_time.lock()
        }
    }
}
