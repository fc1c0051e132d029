use crossbeam_channel::RecvTimeoutError;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Result of a job run under [`run_bounded`].
#[derive(Debug, PartialEq, Eq)]
pub enum Bounded<T> {
    Finished(T),
    /// The deadline passed. The worker keeps running detached and its result
    /// is discarded when it eventually finishes.
    TimedOut,
    /// The worker panicked or could not be started.
    Abandoned,
}

impl<T> Bounded<T> {
    pub fn finished(self) -> Option<T> {
        match self {
            Bounded::Finished(value) => Some(value),
            Bounded::TimedOut | Bounded::Abandoned => None,
        }
    }
}

/// Run `job` on its own thread and wait at most `timeout` for it.
///
/// Used around PDF parsing and rendering, where a pathological document can
/// block inside a library call indefinitely.
pub fn run_bounded<T, F>(label: &str, timeout: Duration, job: F) -> Bounded<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);

    let spawned = thread::Builder::new()
        .name(format!("paper-duper-{}", label))
        .spawn(move || {
            // The receiver is gone after a timeout; nothing left to report to.
            let _ = tx.send(job());
        });

    if let Err(e) = spawned {
        error!("Unable to start {} worker: {}", label, e);
        return Bounded::Abandoned;
    }

    match rx.recv_timeout(timeout) {
        Ok(value) => Bounded::Finished(value),
        Err(RecvTimeoutError::Timeout) => Bounded::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            warn!("{} worker stopped without a result", label);
            Bounded::Abandoned
        }
    }
}
