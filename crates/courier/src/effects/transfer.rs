use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use courier_multipart::MultipartFormData;
use tokio::sync::oneshot;

use super::callback::CallbackContext;
use super::engine::{Transfer, TransferPhase, TransferShared};
use super::session::Session;
use super::transport::{BoxStream, StreamProvider};
use crate::data::{DataResponse, DownloadResponse, Progress, RequestId, Response, ResponseHead, TaskId};
use crate::error::{Error, Result};

/// Body of an upload.
pub enum Uploadable {
    Data(Bytes),
    File(PathBuf),
    /// A fresh stream is requested from `provider` for every attempt.
    Stream {
        provider: StreamProvider,
        length:   Option<u64>,
    },
    /// Encoded in memory below `memory_threshold` bytes of payload, spooled
    /// to a temporary file otherwise. `None` uses the session setting.
    Multipart {
        form:             MultipartFormData,
        memory_threshold: Option<u64>,
    },
}

impl Uploadable {
    pub fn multipart(form: MultipartFormData) -> Self {
        Uploadable::Multipart {
            form,
            memory_threshold: None,
        }
    }

    pub fn stream<F>(provider: F, length: Option<u64>) -> Self
    where
        F: Fn() -> BoxStream<'static, io::Result<Bytes>> + Send + Sync + 'static,
    {
        Uploadable::Stream {
            provider: Arc::new(provider),
            length,
        }
    }

    /// Override the in-memory limit of a multipart body. Other bodies are unchanged.
    #[must_use]
    pub fn with_memory_threshold(self, threshold: u64) -> Self {
        match self {
            Uploadable::Multipart { form, .. } => Uploadable::Multipart {
                form,
                memory_threshold: Some(threshold),
            },
            other => other,
        }
    }
}

impl From<Bytes> for Uploadable {
    fn from(bytes: Bytes) -> Self { Uploadable::Data(bytes) }
}

impl From<Vec<u8>> for Uploadable {
    fn from(bytes: Vec<u8>) -> Self { Uploadable::Data(Bytes::from(bytes)) }
}

impl From<&'static str> for Uploadable {
    fn from(text: &'static str) -> Self { Uploadable::Data(Bytes::from_static(text.as_bytes())) }
}

impl From<MultipartFormData> for Uploadable {
    fn from(form: MultipartFormData) -> Self { Uploadable::multipart(form) }
}

impl fmt::Debug for Uploadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uploadable::Data(bytes) => write!(f, "Data({} bytes)", bytes.len()),
            Uploadable::File(path) => f.debug_tuple("File").field(path).finish(),
            Uploadable::Stream { length, .. } => f.debug_struct("Stream").field("length", length).finish(),
            Uploadable::Multipart {
                form,
                memory_threshold,
            } => f
                .debug_struct("Multipart")
                .field("form", form)
                .field("memory_threshold", memory_threshold)
                .finish(),
        }
    }
}

/// Where a download starts from.
#[derive(Debug, Clone)]
pub enum Downloadable {
    Request,
    ResumeData(Bytes),
    ResumeDataFile(PathBuf),
}

/// Controls a running transfer from any thread.
#[derive(Clone)]
pub struct TransferHandle {
    shared:  Arc<TransferShared>,
    session: Session,
}

impl TransferHandle {
    pub fn cancel(&self) { self.session.cancel_transfer(&self.shared, false); }

    /// Cancel and ask the transport for resume data, which ends up on the
    /// response and in [`resume_data`](Self::resume_data).
    pub fn cancel_producing_resume_data(&self) { self.session.cancel_transfer(&self.shared, true); }

    pub fn suspend(&self) {
        if let Some(task) = self.shared.task() {
            self.session.transport().suspend(task);
        }
    }

    pub fn resume(&self) {
        if let Some(task) = self.shared.task() {
            self.session.transport().resume(task);
        }
    }

    pub fn phase(&self) -> TransferPhase { self.shared.phase() }

    pub fn resume_data(&self) -> Option<Bytes> { self.shared.resume_data() }

    /// Task of the current attempt.
    pub fn task_id(&self) -> Option<TaskId> { self.shared.task() }

    pub fn request_id(&self) -> RequestId { self.shared.request_id }

    pub fn is_cancelled(&self) -> bool { self.shared.is_cancelled() }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("request_id", &self.shared.request_id)
            .field("phase", &self.shared.phase())
            .field("task", &self.shared.task())
            .finish()
    }
}

impl Transfer {
    pub(crate) fn handle(&self) -> TransferHandle {
        TransferHandle {
            shared:  self.shared.clone(),
            session: self.session.clone(),
        }
    }

    fn send_blocking_as<T: Send + 'static>(self, convert: fn(Response) -> Result<T>) -> Result<T> {
        let runtime = self.session.runtime().clone();
        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            let _ = tx.send(self.run().await.and_then(convert));
        });
        rx.blocking_recv()
            .unwrap_or_else(|_| Err(Error::SessionInvalidated(Some("transfer ended without a result".to_string()))))
    }

    fn start_as<T, F>(self, convert: fn(Response) -> Result<T>, callback: F) -> TransferHandle
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let handle = self.handle();
        let runtime = self.session.runtime().clone();
        let queue = self.session.main_queue().clone();
        runtime.spawn(async move {
            let result = self.run().await.and_then(convert);
            queue.dispatch(move || callback(result));
        });
        handle
    }
}

/// A data or upload request, configured and ready to send.
///
/// # Examples
///
/// ```no_run
/// use courier::{Request, Session};
///
/// # async fn demo(session: Session) -> courier::Result<()> {
/// let response = session
///     .data(Request::get("https://example.com/items"))
///     .progress(|p| println!("{:?}", p.percentage()))
///     .send()
///     .await?;
///
/// println!("{}", response.status_code());
/// # Ok(())
/// # }
/// ```
pub struct DataTransfer {
    transfer: Transfer,
}

impl DataTransfer {
    pub(crate) fn new(transfer: Transfer) -> Self { Self { transfer } }

    /// Download progress of the response body.
    #[must_use]
    pub fn progress(mut self, handler: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.transfer.hooks.progress = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn upload_progress(mut self, handler: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.transfer.hooks.upload_progress = Some(Arc::new(handler));
        self
    }

    /// Where progress and stream callbacks run. Defaults to the session's main queue.
    #[must_use]
    pub fn progress_context(mut self, context: CallbackContext) -> Self {
        self.transfer.hooks.context = context;
        self
    }

    /// Receive body chunks as they arrive. The body is still collected.
    #[must_use]
    pub fn data_stream(mut self, handler: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.transfer.hooks.data_stream = Some(Arc::new(handler));
        self
    }

    /// Fail responses whose MIME type matches none of `types` (`*` wildcards allowed).
    #[must_use]
    pub fn acceptable_content_types(mut self, types: &[&str]) -> Self {
        self.transfer.acceptable = Some(types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn handle(&self) -> TransferHandle { self.transfer.handle() }

    pub async fn send(self) -> Result<DataResponse> { self.transfer.run().await?.into_data() }

    /// Block the calling thread until the request, retries included, is done.
    ///
    /// # Panics
    ///
    /// When called from within an async context.
    pub fn send_blocking(self) -> Result<DataResponse> { self.transfer.send_blocking_as(Response::into_data) }

    /// Run in the background; `callback` runs on the session's main queue.
    pub fn start(self, callback: impl FnOnce(Result<DataResponse>) + Send + 'static) -> TransferHandle {
        self.transfer.start_as(Response::into_data, callback)
    }
}

/// A download, configured and ready to send.
pub struct DownloadTransfer {
    transfer: Transfer,
}

impl DownloadTransfer {
    pub(crate) fn new(transfer: Transfer) -> Self { Self { transfer } }

    #[must_use]
    pub fn progress(mut self, handler: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.transfer.hooks.progress = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn progress_context(mut self, context: CallbackContext) -> Self {
        self.transfer.hooks.context = context;
        self
    }

    /// Pick the final location of the downloaded file. Without one, files go
    /// to `~/Downloads` under the server's suggested name.
    #[must_use]
    pub fn destination<F>(mut self, destination: F) -> Self
    where
        F: Fn(&Path, Option<&ResponseHead>) -> PathBuf + Send + Sync + 'static,
    {
        self.transfer.hooks.destination = Some(Arc::new(destination));
        self
    }

    /// Always move the file to `path`.
    #[must_use]
    pub fn destination_path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.destination(move |_, _| path.clone())
    }

    pub fn handle(&self) -> TransferHandle { self.transfer.handle() }

    pub async fn send(self) -> Result<DownloadResponse> { self.transfer.run().await?.into_download() }

    /// Block the calling thread until the download is done.
    ///
    /// # Panics
    ///
    /// When called from within an async context.
    pub fn send_blocking(self) -> Result<DownloadResponse> {
        self.transfer.send_blocking_as(Response::into_download)
    }

    pub fn start(self, callback: impl FnOnce(Result<DownloadResponse>) + Send + 'static) -> TransferHandle {
        self.transfer.start_as(Response::into_download, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_threshold_only_touches_multipart() {
        let data = Uploadable::from("body").with_memory_threshold(0);
        assert!(matches!(data, Uploadable::Data(_)));

        let form = Uploadable::from(MultipartFormData::with_boundary("b")).with_memory_threshold(5);
        assert!(matches!(
            form,
            Uploadable::Multipart {
                memory_threshold: Some(5),
                ..
            }
        ));
    }

    #[test]
    fn test_debug_hides_payload() {
        let upload = Uploadable::from(vec![0u8; 32]);
        assert_eq!(format!("{upload:?}"), "Data(32 bytes)");
    }
}
