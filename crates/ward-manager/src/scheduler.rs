//! Background thread driving the periodic load-retry and save sweeps.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{debug, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Runs two periodic tasks on one thread until stopped.
///
/// A task returning `false` stops the scheduler; tasks use that once the
/// state they work on is gone.
pub struct Scheduler {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(
        name: &str,
        load_interval: Duration,
        save_interval: Duration,
        mut retry_loads: impl FnMut() -> bool + Send + 'static,
        mut save_changes: impl FnMut() -> bool + Send + 'static,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);
        let loads = tick(load_interval.max(MIN_INTERVAL));
        let saves = tick(save_interval.max(MIN_INTERVAL));

        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            loop {
                select! {
                    recv(stopped) -> _ => break,
                    recv(loads) -> _ => {
                        if !retry_loads() {
                            break;
                        }
                    }
                    recv(saves) -> _ => {
                        if !save_changes() {
                            break;
                        }
                    }
                }
            }
        })?;

        debug!("{name}: scheduler started");
        Ok(Self {
            name: name.to_owned(),
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for the task in progress to finish.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{}: scheduler thread panicked", self.name);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Retry timing for one failing operation, with suppression of repeated
/// identical errors.
#[derive(Clone, Debug)]
pub struct Backoff {
    failures: u32,
    next_attempt: Instant,
    last_error: Option<String>,
}

impl Backoff {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            failures: 0,
            next_attempt: now,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_attempt
    }

    /// Record a failure and push the next attempt out. The delay doubles per
    /// consecutive failure, capped at `max`. Returns `true` if the error
    /// differs from the previous one and is worth logging in full.
    pub fn fail(&mut self, now: Instant, error: &str, interval: Duration, max: Duration) -> bool {
        self.failures = self.failures.saturating_add(1);
        let factor = 1_u32 << (self.failures - 1).min(16);
        let delay = interval.saturating_mul(factor).min(max.max(interval));
        // The sweep runs every `interval`, so the first retry is the next one.
        self.next_attempt = now + delay.saturating_sub(interval);

        let fresh = self.last_error.as_deref() != Some(error);
        self.last_error = Some(error.to_owned());
        fresh
    }
}
