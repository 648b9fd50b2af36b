use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures_util::{FutureExt, StreamExt};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::trace;
use url::Url;
use uuid::Uuid;

use super::transport::{
    Challenge, ChallengeDisposition, ChallengeKind, DownloadSource, EventSink, ResumeDataFuture, TaskRequest,
    Transport, TransportEvent, UploadBody,
};
use crate::data::{Credential, Headers, Method, ResponseHead, ResumeData, TaskId, TaskMetrics, WireRequest};
use crate::error::TransportError;

/// Scripted reply of a [`MockTransport`] route.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status:      u16,
    pub headers:     Headers,
    pub body:        Bytes,
    /// Body chunk size; `0` sends the body in one piece.
    pub chunk_size:  usize,
    pub chunk_delay: Duration,
    /// Fail the task with this error instead of responding.
    pub error:       Option<TransportError>,
    /// Require HTTP basic authentication with this credential.
    pub basic_auth:  Option<Credential>,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            chunk_size: 0,
            chunk_delay: Duration::ZERO,
            error: None,
            basic_auth: None,
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self { Self::new(200).body(body) }

    pub fn failure(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(0)
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn chunked(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = chunk_delay;
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(Credential::new(user, password));
        self
    }

    fn head(&self, url: &Url, body_length: u64) -> ResponseHead {
        let mut headers = self.headers.clone();
        if !headers.contains("Content-Length") {
            headers.insert("Content-Length", body_length.to_string());
        }
        ResponseHead::new(url.clone(), self.status, headers)
    }

    fn chunks(&self, from: usize) -> Vec<Bytes> {
        let body = self.body.slice(from.min(self.body.len())..);
        if body.is_empty() {
            return Vec::new();
        }
        let size = if self.chunk_size == 0 { body.len() } else { self.chunk_size };
        (0..body.len())
            .step_by(size)
            .map(|start| body.slice(start..(start + size).min(body.len())))
            .collect()
    }
}

/// What a [`MockTransport`] was asked to send.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedBody {
    None,
    Bytes(Bytes),
    File { path: PathBuf, contents: Option<Bytes> },
    Stream { length: Option<u64> },
    ResumeData(Bytes),
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub task:    TaskId,
    pub url:     Url,
    pub method:  Method,
    pub headers: Headers,
    pub body:    SubmittedBody,
}

struct DownloadState {
    url:     String,
    partial: PathBuf,
    written: AtomicU64,
}

struct MockTask {
    running:  watch::Sender<bool>,
    handle:   Option<JoinHandle<()>>,
    download: Option<Arc<DownloadState>>,
    events:   EventSink,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, MockTask>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// In-process [`Transport`] answering from scripted routes.
///
/// Routes match the request's full URL or its path. One-shot routes are
/// consumed by the first matching submission and take precedence over
/// regular routes. Unmatched requests get a `404`. Downloads are written to `<tmp>/courier.mock/`, and cancelled
/// downloads produce resume data the mock understands.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use courier::effects::{MockResponse, MockTransport};
///
/// let mock = Arc::new(
///     MockTransport::new()
///         .route("/status/503", MockResponse::new(503))
///         .route("/get", MockResponse::ok("hello")),
/// );
/// assert_eq!(mock.submission_count("/get"), 0);
/// ```
pub struct MockTransport {
    routes:      Vec<(String, MockResponse)>,
    once:        Mutex<Vec<(String, MockResponse)>>,
    background:  bool,
    trust:       bool,
    next_task:   AtomicU64,
    submissions: Mutex<Vec<Submission>>,
    tasks:       TaskTable,
}

impl Default for MockTransport {
    fn default() -> Self { Self::new() }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes:      Vec::new(),
            once:        Mutex::new(Vec::new()),
            background:  false,
            trust:       false,
            next_task:   AtomicU64::new(1),
            submissions: Mutex::new(Vec::new()),
            tasks:       Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn route(mut self, pattern: impl Into<String>, response: MockResponse) -> Self {
        self.routes.push((pattern.into(), response));
        self
    }

    /// Answer only the next matching submission with `response`.
    #[must_use]
    pub fn route_once(self, pattern: impl Into<String>, response: MockResponse) -> Self {
        lock(&self.once).push((pattern.into(), response));
        self
    }

    /// Pretend to be a background session, which forces multipart spooling.
    #[must_use]
    pub fn background_session(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Raise a server-trust challenge before every `https` data or upload task.
    #[must_use]
    pub fn server_trust_challenges(mut self, enabled: bool) -> Self {
        self.trust = enabled;
        self
    }

        pub fn submissions(&self) -> Vec<Submission> { lock(&self.submissions).clone() }

    /// Submissions whose URL or path equals `pattern`.
    pub fn submission_count(&self, pattern: &str) -> usize {
        lock(&self.submissions)
            .iter()
            .filter(|s| s.url.as_str() == pattern || s.url.path() == pattern)
            .count()
    }

    /// Tasks that were submitted and have not finished.
    pub fn live_tasks(&self) -> usize { lock(&self.tasks).len() }

    fn lookup(&self, url: &Url) -> MockResponse {
        let matches = |pattern: &String| pattern == url.as_str() || pattern == url.path();

        let mut once = lock(&self.once);
        if let Some(index) = once.iter().position(|(pattern, _)| matches(pattern)) {
            return once.remove(index).1;
        }
        drop(once);

        self.routes
            .iter()
            .rev()
            .find(|(pattern, _)| matches(pattern))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| MockResponse::new(404))
    }

    fn trust_host(&self, url: &Url) -> Option<String> {
        (self.trust && url.scheme() == "https").then(|| url.host_str().unwrap_or_default().to_string())
    }

    fn record(&self, task: TaskId, request: &WireRequest, body: SubmittedBody) {
        lock(&self.submissions).push(Submission {
            task,
            url: request.url.clone(),
            method: request.method,
            headers: request.headers.clone(),
            body,
        });
    }

    fn plan(&self, task: TaskId, request: TaskRequest) -> Script {
        match request {
            TaskRequest::Data(request) => {
                let body = request.body.clone().map_or(SubmittedBody::None, SubmittedBody::Bytes);
                self.record(task, &request, body);
                Script::Data {
                    response: self.lookup(&request.url),
                    trust_host: self.trust_host(&request.url),
                    request,
                    upload: None,
                }
            }
            TaskRequest::Upload { request, body } => {
                let submitted = match &body {
                    UploadBody::Bytes(bytes) => SubmittedBody::Bytes(bytes.clone()),
                    UploadBody::File(path) => SubmittedBody::File {
                        path:     path.clone(),
                        contents: std::fs::read(path).ok().map(Bytes::from),
                    },
                    UploadBody::Stream { length, .. } => SubmittedBody::Stream { length: *length },
                };
                self.record(task, &request, submitted);
                Script::Data {
                    response: self.lookup(&request.url),
                    trust_host: self.trust_host(&request.url),
                    request,
                    upload: Some(body),
                }
            }
            TaskRequest::Download(DownloadSource::Request(request)) => {
                self.record(task, &request, SubmittedBody::None);
                let state = Arc::new(DownloadState {
                    url:     request.url.to_string(),
                    partial: std::env::temp_dir()
                        .join("courier.mock")
                        .join(format!("{}.part", Uuid::new_v4())),
                    written: AtomicU64::new(0),
                });
                Script::Download {
                    response: self.lookup(&request.url),
                    url: request.url,
                    state,
                }
            }
            TaskRequest::Download(DownloadSource::ResumeData(data)) => {
                let resume = ResumeData::from_bytes(&data).and_then(|resume| {
                    let url = Url::parse(&resume.url).ok()?;
                    Some((resume, url))
                });
                let Some((resume, url)) = resume else {
                    return Script::Fail(TransportError::Other("resume data is invalid".to_string()));
                };
                lock(&self.submissions).push(Submission {
                    task,
                    url: url.clone(),
                    method: Method::Get,
                    headers: Headers::new(),
                    body: SubmittedBody::ResumeData(data),
                });
                Script::Download {
                    response: self.lookup(&url),
                    url,
                    state: Arc::new(DownloadState {
                        url:     resume.url,
                        partial: resume.partial_path,
                        written: AtomicU64::new(resume.offset),
                    }),
                }
            }
        }
    }
}

enum Script {
    Data {
        request:    WireRequest,
        response:   MockResponse,
        upload:     Option<UploadBody>,
        trust_host: Option<String>,
    },
    Download {
        url:      Url,
        response: MockResponse,
        state:    Arc<DownloadState>,
    },
    Fail(TransportError),
}

impl Transport for MockTransport {
    fn submit(&self, request: TaskRequest, events: EventSink) -> TaskId {
        let task = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let script = self.plan(task, request);
        let download = match &script {
            Script::Download { state, .. } => Some(state.clone()),
            _ => None,
        };

        let (running, started) = watch::channel(false);
        let tasks = self.tasks.clone();
        lock(&self.tasks).insert(task, MockTask {
            running,
            handle: None,
            download,
            events: events.clone(),
        });

        let handle = tokio::spawn(async move {
            run(task, script, events, started).await;
            lock(&tasks).remove(&task);
        });
        if let Some(entry) = lock(&self.tasks).get_mut(&task) {
            entry.handle = Some(handle);
        }
        trace!("mock submitted {task}");
        task
    }

    fn resume(&self, task: TaskId) {
        if let Some(entry) = lock(&self.tasks).get(&task) {
            entry.running.send_replace(true);
        }
    }

    fn suspend(&self, task: TaskId) {
        if let Some(entry) = lock(&self.tasks).get(&task) {
            entry.running.send_replace(false);
        }
    }

    fn cancel(&self, task: TaskId, produce_resume_data: bool) -> ResumeDataFuture {
        let Some(entry) = lock(&self.tasks).remove(&task) else {
            return futures_util::future::ready(None).boxed();
        };
        if let Some(handle) = &entry.handle {
            handle.abort();
        }

        let resume_data = entry
            .download
            .filter(|_| produce_resume_data)
            .and_then(|state| {
                let offset = state.written.load(Ordering::Acquire);
                (offset > 0).then(|| {
                    ResumeData {
                        url: state.url.clone(),
                        partial_path: state.partial.clone(),
                        offset,
                        validator: None,
                    }
                    .to_bytes()
                })
            });

        entry.events.emit(task, TransportEvent::Completed {
            error:       Some(TransportError::Cancelled),
            resume_data: resume_data.clone(),
        });
        futures_util::future::ready(resume_data).boxed()
    }

    fn is_background_session(&self) -> bool { self.background }
}

async fn wait_running(running: &mut watch::Receiver<bool>) -> bool { running.wait_for(|r| *r).await.is_ok() }

fn complete(events: &EventSink, task: TaskId, error: Option<TransportError>) {
    events.emit(task, TransportEvent::Completed {
        error,
        resume_data: None,
    });
}

async fn run(task: TaskId, script: Script, events: EventSink, mut running: watch::Receiver<bool>) {
    if !wait_running(&mut running).await {
        return;
    }
    let started_at = Utc::now();
    let clock = Instant::now();

    match script {
        Script::Fail(error) => complete(&events, task, Some(error)),
        Script::Data {
            request,
            response,
            upload,
            trust_host,
        } => {
            if let Some(host) = trust_host {
                if !evaluate_trust(task, host.clone(), &events).await {
                    return complete(&events, task, Some(TransportError::ServerTrustRejected { host }));
                }
            }

            let sent = match upload {
                Some(body) => match send_body(task, body, &events).await {
                    Ok(sent) => sent,
                    Err(error) => return complete(&events, task, Some(error)),
                },
                None => 0,
            };

            if let Some(error) = response.error.clone() {
                return complete(&events, task, Some(error));
            }

            let response = match authenticate(task, &request, response, &events).await {
                Some(response) => response,
                None => return complete(&events, task, Some(TransportError::Cancelled)),
            };

            events.emit(task, TransportEvent::Response(response.head(&request.url, response.body.len() as u64)));
            let mut received = 0;
            for chunk in response.chunks(0) {
                if !wait_running(&mut running).await {
                    return;
                }
                tokio::time::sleep(response.chunk_delay).await;
                received += chunk.len() as u64;
                events.emit(task, TransportEvent::Data(chunk));
            }

            events.emit(task, TransportEvent::Metrics(TaskMetrics {
                started_at,
                duration: clock.elapsed(),
                bytes_sent: sent,
                bytes_received: received,
            }));
            complete(&events, task, None);
        }
        Script::Download { url, response, state } => {
            if let Some(error) = response.error.clone() {
                return complete(&events, task, Some(error));
            }
            let received = match write_download(task, &url, &response, &state, &events, &mut running).await {
                Ok(Some(received)) => received,
                Ok(None) => return,
                Err(error) => return complete(&events, task, Some(TransportError::network(error))),
            };

            events.emit(task, TransportEvent::DownloadFinished {
                location: state.partial.clone(),
            });
            events.emit(task, TransportEvent::Metrics(TaskMetrics {
                started_at,
                duration: clock.elapsed(),
                bytes_sent: 0,
                bytes_received: received,
            }));
            complete(&events, task, None);
        }
    }
}

async fn send_body(task: TaskId, body: UploadBody, events: &EventSink) -> Result<u64, TransportError> {
    let mut sent = 0u64;
    match body {
        UploadBody::Bytes(bytes) => {
            sent = bytes.len() as u64;
            events.emit(task, TransportEvent::UploadProgress { sent, total: Some(sent) });
        }
        UploadBody::File(path) => {
            let contents = fs::read(&path).await.map_err(TransportError::network)?;
            sent = contents.len() as u64;
            events.emit(task, TransportEvent::UploadProgress { sent, total: Some(sent) });
        }
        UploadBody::Stream { mut stream, length } => {
            while let Some(chunk) = stream.next().await {
                sent += chunk.map_err(TransportError::network)?.len() as u64;
                events.emit(task, TransportEvent::UploadProgress { sent, total: length });
            }
        }
    }
    Ok(sent)
}

async fn evaluate_trust(task: TaskId, host: String, events: &EventSink) -> bool {
    let (reply, answer) = oneshot::channel();
    events.emit(task, TransportEvent::Challenge {
        challenge: Challenge {
            kind:                   ChallengeKind::ServerTrust { host },
            previous_failure_count: 0,
        },
        reply,
    });
    !matches!(
        answer.await,
        Ok(ChallengeDisposition::CancelChallenge | ChallengeDisposition::RejectProtectionSpace) | Err(_)
    )
}

/// Run the basic-auth challenge loop. `None` when the challenge was cancelled.
async fn authenticate(
    task: TaskId,
    request: &WireRequest,
    response: MockResponse,
    events: &EventSink,
) -> Option<MockResponse> {
    let Some(expected) = response.basic_auth.clone() else {
        return Some(response);
    };
    let expected_header = crate::data::Authorization::basic(expected.user(), expected.password()).header_value();
    if request.headers.get("Authorization").map(str::to_string) == expected_header {
        return Some(response);
    }

    let mut previous_failure_count = 0;
    loop {
        let (reply, answer) = oneshot::channel();
        events.emit(task, TransportEvent::Challenge {
            challenge: Challenge {
                kind: ChallengeKind::HttpAuth {
                    host:   request.url.host_str().unwrap_or_default().to_string(),
                    realm:  Some("mock".to_string()),
                    scheme: "Basic".to_string(),
                },
                previous_failure_count,
            },
            reply,
        });

        match answer.await {
            Ok(ChallengeDisposition::UseCredential(credential)) if credential == expected => return Some(response),
            Ok(ChallengeDisposition::UseCredential(_)) => previous_failure_count += 1,
            Ok(ChallengeDisposition::CancelChallenge) | Err(_) => return None,
            Ok(_) => {
                return Some(
                    MockResponse::new(401).header("WWW-Authenticate", "Basic realm=\"mock\""),
                );
            }
        }
    }
}

async fn write_download(
    task: TaskId,
    url: &Url,
    response: &MockResponse,
    state: &DownloadState,
    events: &EventSink,
    running: &mut watch::Receiver<bool>,
) -> std::io::Result<Option<u64>> {
    let total = response.body.len() as u64;
    let offset = state.written.load(Ordering::Acquire).min(total);

    if let Some(parent) = state.partial.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = if offset > 0 {
        let mut file = OpenOptions::new().write(true).open(&state.partial).await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::End(0)).await?;
        file
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&state.partial)
            .await?
    };

    events.emit(task, TransportEvent::Response(response.head(url, total - offset)));
    if offset > 0 {
        events.emit(task, TransportEvent::DownloadResumed {
            offset,
            total: Some(total),
        });
    }

    let mut received = 0;
    for chunk in response.chunks(offset as usize) {
        if !wait_running(running).await {
            return Ok(None);
        }
        tokio::time::sleep(response.chunk_delay).await;
        file.write_all(&chunk).await?;
        file.flush().await?;
        received += chunk.len() as u64;
        let written = offset + received;
        state.written.store(written, Ordering::Release);
        events.emit(task, TransportEvent::DownloadProgress {
            written,
            total: Some(total),
        });
    }
    Ok(Some(received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RequestBuilder;
    use crate::effects::transport::event_channel;

    fn get(url: &str) -> TaskRequest { TaskRequest::Data(RequestBuilder::new(url).build().unwrap()) }

    #[test]
    fn test_chunks_cover_body() {
        let response = MockResponse::ok(vec![7u8; 10]).chunked(4, Duration::ZERO);
        let sizes: Vec<usize> = response.chunks(0).iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(response.chunks(8).iter().map(Bytes::len).sum::<usize>(), 2);
        assert!(MockResponse::new(204).chunks(0).is_empty());
    }

    #[tokio::test]
    async fn test_task_waits_for_resume() {
        let mock = MockTransport::new().route("/get", MockResponse::ok("hi"));
        let (sink, mut rx) = event_channel();

        let task = mock.submit(get("https://example.com/get"), sink);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        mock.resume(task);
        let mut saw_data = false;
        while let Some((id, event)) = rx.recv().await {
            assert_eq!(id, task);
            match event {
                TransportEvent::Data(data) => {
                    assert_eq!(data, Bytes::from_static(b"hi"));
                    saw_data = true;
                }
                TransportEvent::Completed { error, .. } => {
                    assert!(error.is_none());
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_data);
        assert_eq!(mock.submission_count("/get"), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let mock = MockTransport::new();
        let (sink, mut rx) = event_channel();
        let task = mock.submit(get("https://example.com/missing"), sink);
        mock.resume(task);

        let status = loop {
            match rx.recv().await {
                Some((_, TransportEvent::Response(head))) => break head.status,
                Some(_) => continue,
                None => panic!("no response"),
            }
        };
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_cancel_completes_once_with_cancelled() {
        let mock = MockTransport::new()
            .route("/slow", MockResponse::ok(vec![0u8; 100]).chunked(10, Duration::from_millis(50)));
        let (sink, mut rx) = event_channel();
        let task = mock.submit(get("https://example.com/slow"), sink);
        mock.resume(task);

        assert_eq!(mock.cancel(task, false).await, None);
        assert_eq!(mock.live_tasks(), 0);

        let mut completions = 0;
        while let Ok(Some((_, event))) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            if let TransportEvent::Completed { error, .. } = event {
                assert!(matches!(error, Some(TransportError::Cancelled)));
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_one_shot_route_is_consumed() {
        let mock = MockTransport::new()
            .route("/flaky", MockResponse::ok("second"))
            .route_once("/flaky", MockResponse::new(500));

        assert_eq!(mock.lookup(&Url::parse("https://example.com/flaky").unwrap()).status, 500);
        assert_eq!(mock.lookup(&Url::parse("https://example.com/flaky").unwrap()).status, 200);
        assert_eq!(mock.lookup(&Url::parse("https://example.com/flaky").unwrap()).status, 200);
    }

    #[tokio::test]
    async fn test_stopped_download_does_not_finish() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("https://example.com/file.bin").unwrap();
        let state = Arc::new(DownloadState {
            url:     url.to_string(),
            partial: dir.path().join("file.part"),
            written: AtomicU64::new(0),
        });
        let response = MockResponse::ok(vec![1u8; 100]).chunked(10, Duration::from_millis(10));
        let (sink, mut rx) = event_channel();
        let (running, receiver) = watch::channel(true);

        let script = Script::Download {
            url,
            response,
            state: state.clone(),
        };
        let worker = tokio::spawn(run(TaskId(1), script, sink, receiver));

        tokio::time::sleep(Duration::from_millis(35)).await;
        running.send_replace(false);
        drop(running);
        worker.await.unwrap();

        let mut events = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(e, TransportEvent::DownloadProgress { .. })));
        assert!(!events.iter().any(|e| {
            matches!(e, TransportEvent::DownloadFinished { .. } | TransportEvent::Completed { .. })
        }));
        assert!(state.written.load(Ordering::Acquire) < 100);
    }
}
