use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::debug;

use super::callback::{CallbackContext, CallbackQueue};
use super::engine::{Payload, Transfer, TransferShared};
use super::registry::{TaskRegistry, TransferHooks};
use super::runtime;
use super::transfer::{DataTransfer, DownloadTransfer, Downloadable, Uploadable};
use super::transport::{EventSink, Transport, event_channel};
use crate::data::{SessionConfig, TaskId};
use crate::error::Result;
use crate::request::ApiRequest;

struct SessionInner {
    transport:  Arc<dyn Transport>,
    registry:   Arc<TaskRegistry>,
    events:     EventSink,
    config:     SessionConfig,
    runtime:    Handle,
    main_queue: CallbackQueue,
}

/// Entry point for creating transfers.
///
/// Cloning is cheap; clones share the transport, the task registry and the
/// event dispatcher.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session whose dispatcher and callbacks run on `runtime`.
    pub fn with_runtime(transport: Arc<dyn Transport>, config: SessionConfig, runtime: Handle) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let (events, mut rx) = event_channel();

        let dispatcher = registry.clone();
        runtime.spawn(async move {
            while let Some((task, event)) = rx.recv().await {
                dispatcher.handle_event(task, event).await;
            }
            debug!("event dispatcher stopped");
        });
        let main_queue = CallbackQueue::spawn(&runtime);

        Self {
            inner: Arc::new(SessionInner {
                transport,
                registry,
                events,
                config,
                runtime,
                main_queue,
            }),
        }
    }

    /// Create a session on the current runtime, or on a shared background
    /// runtime when called outside of one.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        Ok(Self::with_runtime(transport, config, runtime::handle()?))
    }

    /// Process-wide session backed by `reqwest` with default configuration.
    ///
    /// It runs on the crate's dedicated runtime, so it outlives the runtime
    /// of whoever touched it first.
    #[cfg(feature = "reqwest")]
    pub fn shared() -> Result<&'static Session> {
        use once_cell::sync::OnceCell;

        use super::reqwest_transport::ReqwestTransport;

        static SHARED: OnceCell<Session> = OnceCell::new();
        SHARED.get_or_try_init(|| {
            let transport = Arc::new(ReqwestTransport::new()?);
            Ok(Session::with_runtime(transport, SessionConfig::default(), runtime::dedicated_handle()?))
        })
    }

    fn transfer(&self, api: Option<Arc<dyn ApiRequest>>, payload: Payload) -> Transfer {
        let url = api.as_ref().map(|api| api.url());
        let mut hooks = TransferHooks::new(CallbackContext::Queue(self.inner.main_queue.clone()));
        if let Some(api) = &api {
            hooks.credential = api.credential();
            hooks.trust_policy = api.trust_policy();
        }
        Transfer {
            session: self.clone(),
            api,
            payload,
            hooks,
            acceptable: None,
            shared: TransferShared::new(url),
        }
    }

    pub fn data(&self, request: impl ApiRequest + 'static) -> DataTransfer {
        DataTransfer::new(self.transfer(Some(Arc::new(request)), Payload::Data))
    }

    pub fn upload(&self, request: impl ApiRequest + 'static, body: impl Into<Uploadable>) -> DataTransfer {
        DataTransfer::new(self.transfer(Some(Arc::new(request)), Payload::Upload(body.into())))
    }

    pub fn download(&self, request: impl ApiRequest + 'static) -> DownloadTransfer {
        DownloadTransfer::new(self.transfer(Some(Arc::new(request)), Payload::Download(Downloadable::Request)))
    }

    /// Continue a download from resume data produced by a cancelled download.
    pub fn download_resuming(&self, resume_data: impl Into<Bytes>) -> DownloadTransfer {
        let payload = Payload::Download(Downloadable::ResumeData(resume_data.into()));
        DownloadTransfer::new(self.transfer(None, payload))
    }

    /// Like [`download_resuming`](Self::download_resuming), reading the resume
    /// data from a file when the download is sent.
    pub fn download_resuming_file(&self, path: impl Into<PathBuf>) -> DownloadTransfer {
        let payload = Payload::Download(Downloadable::ResumeDataFile(path.into()));
        DownloadTransfer::new(self.transfer(None, payload))
    }

    /// Cancel every transfer with a task in flight.
    pub fn cancel_all(&self) {
        for shared in self.inner.registry.owners() {
            self.cancel_transfer(&shared, false);
        }
    }

    /// Cancel transfers whose request URL is `url`. Returns how many were cancelled.
    pub fn cancel_url(&self, url: &str) -> usize {
        let mut cancelled = 0;
        for shared in self.inner.registry.owners() {
            if shared.url().as_deref() == Some(url) && !shared.is_cancelled() {
                self.cancel_transfer(&shared, false);
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn config(&self) -> &SessionConfig { &self.inner.config }

    pub fn registry(&self) -> &TaskRegistry { &self.inner.registry }

    /// Serial queue completion callbacks run on.
    pub fn main_queue(&self) -> &CallbackQueue { &self.inner.main_queue }

    pub fn runtime(&self) -> &Handle { &self.inner.runtime }

    pub(crate) fn transport(&self) -> &dyn Transport { self.inner.transport.as_ref() }

    pub(crate) fn events(&self) -> EventSink { self.inner.events.clone() }

    pub(crate) fn cancel_transfer(&self, shared: &Arc<TransferShared>, produce_resume_data: bool) {
        match shared.request_cancel(produce_resume_data) {
            Some(Some(task)) => self.cancel_task(shared, task, produce_resume_data),
            Some(None) => debug!("{} cancelled between attempts", shared.request_id),
            None => {}
        }
    }

    /// Unregister `task` and stop it. The transfer completes once the
    /// transport handed over its resume data.
    pub(crate) fn cancel_task(&self, shared: &Arc<TransferShared>, task: TaskId, produce_resume_data: bool) {
        debug!("cancelling {task} of {}", shared.request_id);
        let record = self.inner.registry.unregister(task);
        let pending = self.inner.transport.cancel(task, produce_resume_data);

        let shared = shared.clone();
        self.inner.runtime.spawn(async move {
            let resume_data = pending.await;
            if let Some(data) = &resume_data {
                shared.set_resume_data(data.clone());
            }
            if let Some(record) = record {
                record.finish_cancelled(task, resume_data);
            }
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("tasks", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
