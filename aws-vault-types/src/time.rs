/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Injectable clock, so that expiry decisions can be tested without sleeping.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;

/// A source of the current wall-clock time
pub trait TimeSource: Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> SystemTime;
}

#[derive(Debug)]
struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A [`TimeSource`] that may be shared; defaults to the system clock
#[derive(Debug, Clone)]
pub struct SharedTimeSource(Arc<dyn TimeSource>);

impl SharedTimeSource {
    /// Wraps `source`.
    pub fn new(source: impl TimeSource + 'static) -> Self {
        Self(Arc::new(source))
    }

    /// Returns the current time.
    pub fn now(&self) -> SystemTime {
        self.0.now()
    }
}

impl Default for SharedTimeSource {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use testing::TestingTimeSource;

#[cfg(any(test, feature = "test-util"))]
mod testing {
    use super::TimeSource;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::{Duration, SystemTime};

    /// A clock that only moves when told to
    ///
    /// Clones share the same clock, so a test can keep one handle while the code under test
    /// holds another.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use aws_vault_types::time::{SharedTimeSource, TestingTimeSource};
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let time = TestingTimeSource::new(UNIX_EPOCH);
    /// let shared = SharedTimeSource::new(time.clone());
    /// time.advance(Duration::from_secs(100));
    /// assert_eq!(shared.now(), UNIX_EPOCH + Duration::from_secs(100));
    /// ```
    #[derive(Clone, Debug)]
    pub struct TestingTimeSource {
        now: Arc<Mutex<SystemTime>>,
    }

    impl TestingTimeSource {
        /// Starts the clock at `start_time`.
        pub fn new(start_time: SystemTime) -> Self {
            Self {
                now: Arc::new(Mutex::new(start_time)),
            }
        }

        /// Moves the clock forward by `delta`.
        pub fn advance(&self, delta: Duration) {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner) += delta;
        }
    }

    impl TimeSource for TestingTimeSource {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
