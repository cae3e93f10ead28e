//! Push payload consumers and the serial queue they are called on.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Receives push channel payloads and lifecycle callbacks.
///
/// Every call for a given consumer happens on the [`SerialQueue`] it was
/// registered with, one at a time, in arrival order.
pub trait PushConsumer: Send + Sync {
    /// A decoded payload arrived.
    fn did_receive(&self, payload: serde_json::Value);

    /// The push connection opened.
    fn did_open(&self) {}

    /// The push connection closed. `error` is set when the closure was not
    /// requested locally.
    fn did_close(&self, _error: Option<&TransportError>) {}
}

type Job = Box<dyn FnOnce() + Send>;

/// Single-consumer execution context: jobs run one at a time, in the
/// order they were submitted, on a dedicated tokio task.
#[derive(Clone)]
pub struct SerialQueue {
    label: String,
    jobs: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.label).finish_non_exhaustive()
    }
}

impl SerialQueue {
    /// Start a queue on the current tokio runtime.
    ///
    /// The worker task ends once every clone of the queue is dropped and
    /// the remaining jobs have run.
    pub fn spawn(label: impl Into<String>) -> Self {
        let label = label.into();
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker_label = label.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            log::trace!("[SerialQueue] {worker_label} drained");
        });
        Self { label, jobs }
    }

    /// Queue `job`. Returns `false` if the worker is gone.
    pub fn perform<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs.send(Box::new(job)).is_ok()
    }

    /// Queue label, for logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let queue = SerialQueue::spawn("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            assert!(queue.perform(move || seen.lock().unwrap().push(i)));
        }

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        queue.perform(move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        assert_eq!(queue.label(), "test");
    }
}
