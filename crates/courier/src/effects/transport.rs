use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::data::{Credential, ResponseHead, TaskId, TaskMetrics, WireRequest};
use crate::error::TransportError;

/// A boxed stream type for request and response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Produces a fresh upload body stream. Called once per attempt.
pub type StreamProvider = Arc<dyn Fn() -> BoxStream<'static, io::Result<Bytes>> + Send + Sync>;

/// Resolves to the resume data a cancelled task produced, if any.
pub type ResumeDataFuture = BoxFuture<'static, Option<Bytes>>;

/// Body of an upload task.
pub enum UploadBody {
    Bytes(Bytes),
    File(PathBuf),
    Stream {
        stream: BoxStream<'static, io::Result<Bytes>>,
        length: Option<u64>,
    },
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            UploadBody::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadBody::Stream { length, .. } => f.debug_struct("Stream").field("length", length).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DownloadSource {
    Request(WireRequest),
    ResumeData(Bytes),
}

/// What a transport is asked to run.
#[derive(Debug)]
pub enum TaskRequest {
    Data(WireRequest),
    Upload { request: WireRequest, body: UploadBody },
    Download(DownloadSource),
}

impl TaskRequest {
    pub fn wire_request(&self) -> Option<&WireRequest> {
        match self {
            TaskRequest::Data(request) | TaskRequest::Upload { request, .. } => Some(request),
            TaskRequest::Download(DownloadSource::Request(request)) => Some(request),
            TaskRequest::Download(DownloadSource::ResumeData(_)) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    ServerTrust { host: String },
    HttpAuth {
        host:   String,
        realm:  Option<String>,
        scheme: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,

    /// How many times this protection space already failed for the task.
    pub previous_failure_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    UseCredential(Credential),
    /// The server's certificate chain was accepted by a trust policy.
    AcceptServerTrust,
    PerformDefaultHandling,
    CancelChallenge,
    RejectProtectionSpace,
}

/// Decides whether a server is trusted, replacing default certificate handling.
pub trait ServerTrustPolicy: Send + Sync {
    fn evaluate(&self, host: &str) -> bool;
}

impl<F> ServerTrustPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn evaluate(&self, host: &str) -> bool { self(host) }
}

/// Everything a transport reports about a task.
#[derive(Debug)]
pub enum TransportEvent {
    Challenge {
        challenge: Challenge,
        reply:     oneshot::Sender<ChallengeDisposition>,
    },
    Response(ResponseHead),
    Data(Bytes),
    UploadProgress { sent: u64, total: Option<u64> },
    DownloadProgress { written: u64, total: Option<u64> },
    DownloadResumed { offset: u64, total: Option<u64> },
    /// The download is complete in a temporary file the session may move.
    DownloadFinished { location: PathBuf },
    /// An upload task continues as a download under a new task id.
    BecameDownload { task: TaskId },
    Metrics(TaskMetrics),
    /// Always the last event of a task.
    Completed {
        error:       Option<TransportError>,
        resume_data: Option<Bytes>,
    },
}

/// Sending half of the session's serial event dispatcher.
#[derive(Debug, Clone)]
pub struct EventSink(mpsc::UnboundedSender<(TaskId, TransportEvent)>);

impl EventSink {
    pub fn emit(&self, task: TaskId, event: TransportEvent) {
        if let Err(error) = self.0.send((task, event)) {
            trace!("dropping event for {task}, session is gone: {:?}", error.0.1);
        }
    }
}

/// Create a connected sink and receiver.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<(TaskId, TransportEvent)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink(tx), rx)
}

/// The network side of a session.
///
/// Tasks are created suspended by [`submit`](Self::submit) and started by
/// [`resume`](Self::resume). Every task ends with exactly one
/// [`TransportEvent::Completed`], and task ids are never reused.
///
/// Transports spawn their work with `tokio::spawn`, so `submit` must be
/// called from within a tokio runtime.
pub trait Transport: Send + Sync {
    fn submit(&self, request: TaskRequest, events: EventSink) -> TaskId;

    fn resume(&self, task: TaskId);

    fn suspend(&self, task: TaskId);

    /// Stop the task. With `produce_resume_data` the future resolves to data
    /// from which a download can be resumed.
    fn cancel(&self, task: TaskId, produce_resume_data: bool) -> ResumeDataFuture;

    /// Background sessions only upload from files.
    fn is_background_session(&self) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel_delivers_in_order() {
        let (sink, mut rx) = event_channel();
        sink.emit(TaskId(1), TransportEvent::Data(Bytes::from_static(b"a")));
        sink.emit(TaskId(1), TransportEvent::Completed {
            error:       None,
            resume_data: None,
        });

        assert!(matches!(rx.recv().await, Some((TaskId(1), TransportEvent::Data(_)))));
        assert!(matches!(rx.recv().await, Some((TaskId(1), TransportEvent::Completed { .. }))));
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.emit(TaskId(9), TransportEvent::Data(Bytes::new()));
    }

    #[test]
    fn test_closure_trust_policy() {
        let policy = |host: &str| host.ends_with(".internal");
        assert!(policy.evaluate("api.internal"));
        assert!(!policy.evaluate("example.com"));
    }
}
