//! Bounded polling for remote convergence.
//!
//! The control plane is eventually consistent: a successful attach, detach,
//! create or delete call says nothing about what the next read returns. Every
//! wait in the driver goes through [`Poller::until`].

use std::future::Future;
use std::time::Duration;

use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use tokio::time::{Instant, sleep};

use crate::runtime::options::DriverOptions;

/// Fixed-interval poll with a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_options(options: &DriverOptions) -> Self {
        Self::new(options.poll_interval, options.convergence_timeout)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `check` until it yields a value or the deadline passes.
    ///
    /// `check` returns `Ok(Some(v))` when converged, `Ok(None)` to keep
    /// waiting. An error from `check` ends the wait immediately. The check
    /// runs once more at the deadline before giving up with `Timeout`.
    pub async fn until<T, F, Fut>(&self, what: &str, mut check: F) -> CinderliteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CinderliteResult<Option<T>>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(value) = check().await? {
                tracing::trace!(what, attempts, "Converged");
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CinderliteError::Timeout(format!(
                    "{} did not happen within {:?} ({} attempts)",
                    what, self.timeout, attempts
                )));
            }

            sleep(self.interval.min(deadline - now)).await;
        }
    }
}
