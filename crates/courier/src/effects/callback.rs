use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::data::{Progress, ResponseHead};

pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;

pub type DataStreamHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Picks where a finished download goes, given its temporary location.
pub type DestinationFn = Arc<dyn Fn(&Path, Option<&ResponseHead>) -> PathBuf + Send + Sync>;

type Job = Box<dyn FnOnce() + Send>;

/// Serial queue running callbacks one after another on a single task.
#[derive(Clone)]
pub struct CallbackQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl CallbackQueue {
    /// Start a queue draining on `runtime`.
    pub fn spawn(runtime: &Handle) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            trace!("callback queue drained");
        });
        Self { jobs }
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            trace!("callback queue is closed, dropping callback");
        }
    }

    /// Wait until everything dispatched so far has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("CallbackQueue") }
}

/// Where progress and completion callbacks run.
#[derive(Debug, Clone)]
pub enum CallbackContext {
    /// Directly on the session's event dispatcher.
    Inline,
    Queue(CallbackQueue),
}

impl CallbackContext {
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            CallbackContext::Inline => job(),
            CallbackContext::Queue(queue) => queue.dispatch(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_queue_runs_in_order() {
        let queue = CallbackQueue::spawn(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().unwrap().push(i));
        }
        queue.flush().await;

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_inline_runs_immediately() {
        let hit = Arc::new(Mutex::new(false));
        let flag = hit.clone();
        CallbackContext::Inline.dispatch(move || *flag.lock().unwrap() = true);
        assert!(*hit.lock().unwrap());
    }
}
