//! Small lazily-grown worker pool with cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

type Job = Box<dyn FnOnce(&CancelToken) + Send + 'static>;

/// Shared cancellation flag. Jobs poll it between units of work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct Tracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Tracker {
    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Up to `max_workers` threads fed from one unbounded queue.
///
/// Threads are spawned on demand and exit once the pool is shut down and the
/// queue is drained. Jobs still queued after [`WorkerPool::shutdown_now`] are
/// dropped without running.
pub struct WorkerPool {
    name: String,
    max_workers: usize,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    token: CancelToken,
    tracker: Arc<Tracker>,
    spawned: Mutex<usize>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name: name.into(),
            max_workers: max_workers.max(1),
            sender: Mutex::new(Some(sender)),
            receiver,
            token: CancelToken::default(),
            tracker: Arc::default(),
            spawned: Mutex::new(0),
        }
    }

    /// Queue a job. Returns `false` if the pool no longer accepts work.
    pub fn submit(&self, job: impl FnOnce(&CancelToken) + Send + 'static) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            debug!("{}: pool is shut down, dropping job", self.name);
            return false;
        };

        *self.tracker.pending.lock() += 1;
        if sender.send(Box::new(job)).is_err() {
            self.tracker.finish();
            return false;
        }
        self.ensure_worker();
        true
    }

    fn ensure_worker(&self) {
        let mut spawned = self.spawned.lock();
        if *spawned >= self.max_workers {
            return;
        }

        let receiver = self.receiver.clone();
        let token = self.token.clone();
        let tracker = Arc::clone(&self.tracker);
        let result = thread::Builder::new()
            .name(format!("{}-{}", self.name, *spawned))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if !token.is_cancelled() {
                        job(&token);
                    }
                    tracker.finish();
                }
            });

        match result {
            Ok(_) => *spawned += 1,
            Err(e) => error!("{}: failed to spawn worker: {e}", self.name),
        }
    }

    /// Stop accepting jobs; queued jobs still run.
    pub fn shutdown(&self) {
        self.sender.lock().take();
    }

    /// Stop accepting jobs and cancel everything queued or running.
    pub fn shutdown_now(&self) {
        self.token.cancel();
        self.shutdown();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.tracker.pending.lock()
    }

    /// Wait until no job is queued or running. Returns `false` on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.tracker.pending.lock();
        while *pending > 0 {
            if self.tracker.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
