use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures_util::{FutureExt, StreamExt, TryStreamExt, stream};
use reqwest::header::{self, HeaderMap};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use super::transport::{
    BoxStream, Challenge, ChallengeDisposition, ChallengeKind, DownloadSource, EventSink, ResumeDataFuture,
    TaskRequest, Transport, TransportEvent, UploadBody,
};
use crate::data::{CachePolicy, Credential, Headers, ResponseHead, ResumeData, TaskId, TaskMetrics, WireRequest};
use crate::error::{Error, Result, TransportError};

const CHUNK_SIZE: usize = 64 * 1024;

struct DownloadState {
    url:       String,
    partial:   PathBuf,
    written:   AtomicU64,
    validator: Mutex<Option<String>>,
}

impl DownloadState {
    fn validator(&self) -> Option<String> { lock(&self.validator).clone() }

    fn set_validator(&self, validator: Option<String>) { *lock(&self.validator) = validator; }

    fn resume_data(&self) -> Option<Bytes> {
        let offset = self.written.load(Ordering::Acquire);
        (offset > 0).then(|| {
            ResumeData {
                url: self.url.clone(),
                partial_path: self.partial.clone(),
                offset,
                validator: self.validator(),
            }
            .to_bytes()
        })
    }
}

struct LiveTask {
    running:  watch::Sender<bool>,
    handle:   Option<JoinHandle<()>>,
    download: Option<Arc<DownloadState>>,
    events:   EventSink,
}

enum Job {
    Data {
        request: WireRequest,
        upload:  Option<UploadBody>,
    },
    Download {
        request: Option<WireRequest>,
        state:   Arc<DownloadState>,
    },
    Fail(TransportError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// [`Transport`] backed by a [`reqwest::Client`].
///
/// Partial downloads live in `<tmp>/courier.download/` until the session
/// moves them to their destination. Cancelling a download with resume data
/// keeps the partial file and records its `ETag`/`Last-Modified` so the
/// continuation can send `Range` and `If-Range`.
pub struct ReqwestTransport {
    client:    Client,
    next_task: AtomicU64,
    tasks:     Arc<Mutex<HashMap<TaskId, LiveTask>>>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            next_task: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn job(request: TaskRequest) -> Job {
        match request {
            TaskRequest::Data(request) => Job::Data { request, upload: None },
            TaskRequest::Upload { request, body } => Job::Data {
                request,
                upload: Some(body),
            },
            TaskRequest::Download(DownloadSource::Request(request)) => {
                let state = Arc::new(DownloadState {
                    url:       request.url.to_string(),
                    partial:   partial_directory().join(format!("{}.part", Uuid::new_v4())),
                    written:   AtomicU64::new(0),
                    validator: Mutex::new(None),
                });
                Job::Download {
                    request: Some(request),
                    state,
                }
            }
            TaskRequest::Download(DownloadSource::ResumeData(data)) => match ResumeData::from_bytes(&data) {
                Some(resume) => Job::Download {
                    request: None,
                    state:   Arc::new(DownloadState {
                        url:       resume.url,
                        partial:   resume.partial_path,
                        written:   AtomicU64::new(resume.offset),
                        validator: Mutex::new(resume.validator),
                    }),
                },
                None => Job::Fail(TransportError::Other("resume data is invalid".to_string())),
            },
        }
    }
}

fn partial_directory() -> PathBuf { std::env::temp_dir().join("courier.download") }

impl Transport for ReqwestTransport {
    fn submit(&self, request: TaskRequest, events: EventSink) -> TaskId {
        let task = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let job = Self::job(request);
        let download = match &job {
            Job::Download { state, .. } => Some(state.clone()),
            _ => None,
        };

        let (running, started) = watch::channel(false);
        lock(&self.tasks).insert(task, LiveTask {
            running,
            handle: None,
            download,
            events: events.clone(),
        });

        let run = Run {
            client: self.client.clone(),
            task,
            events,
            running: started,
        };
        let tasks = self.tasks.clone();
        let handle = tokio::spawn(async move {
            run.execute(job).await;
            lock(&tasks).remove(&task);
        });
        if let Some(entry) = lock(&self.tasks).get_mut(&task) {
            entry.handle = Some(handle);
        }
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

        let resume_data = match entry.download {
            Some(state) if produce_resume_data => state.resume_data(),
            _ => None,
        };
        debug!("cancelled {task}, resume data: {}", resume_data.is_some());

        entry.events.emit(task, TransportEvent::Completed {
            error:       Some(TransportError::Cancelled),
            resume_data: resume_data.clone(),
        });
        futures_util::future::ready(resume_data).boxed()
    }
}

struct Run {
    client:  Client,
    task:    TaskId,
    events:  EventSink,
    running: watch::Receiver<bool>,
}

impl Run {
    fn emit(&self, event: TransportEvent) { self.events.emit(self.task, event); }

    /// Wait while suspended. `false` once the task was dropped.
    async fn running(&mut self) -> bool { self.running.wait_for(|running| *running).await.is_ok() }

    async fn execute(mut self, job: Job) {
        if !self.running().await {
            return;
        }
        let result = match job {
            Job::Fail(error) => Err(error),
            Job::Data { request, upload } => self.data(&request, upload).await,
            Job::Download { request, state } => self.download(request.as_ref(), &state).await,
        };

        let error = match result {
            Ok(metrics) => {
                self.emit(TransportEvent::Metrics(metrics));
                None
            }
            Err(error) => {
                debug!("{} failed: {error}", self.task);
                Some(error)
            }
        };
        self.emit(TransportEvent::Completed {
            error,
            resume_data: None,
        });
    }

    async fn challenge(&self, kind: ChallengeKind, previous_failure_count: u32) -> ChallengeDisposition {
        let (reply, answer) = oneshot::channel();
        self.emit(TransportEvent::Challenge {
            challenge: Challenge {
                kind,
                previous_failure_count,
            },
            reply,
        });
        answer.await.unwrap_or(ChallengeDisposition::CancelChallenge)
    }

    async fn check_trust(&self, url: &Url) -> std::result::Result<(), TransportError> {
        if url.scheme() != "https" {
            return Ok(());
        }
        let host = url.host_str().unwrap_or_default().to_string();
        match self.challenge(ChallengeKind::ServerTrust { host: host.clone() }, 0).await {
            ChallengeDisposition::CancelChallenge | ChallengeDisposition::RejectProtectionSpace => {
                Err(TransportError::ServerTrustRejected { host })
            }
            _ => Ok(()),
        }
    }

    async fn body(
        &self,
        request: &WireRequest,
        upload: &mut Option<UploadBody>,
        sent: &Arc<AtomicU64>,
    ) -> std::result::Result<Option<Body>, TransportError> {
        let Some(body) = upload.take() else {
            return Ok(request.body.clone().map(Body::from));
        };
        let (chunks, total): (BoxStream<'static, io::Result<Bytes>>, Option<u64>) = match body {
            UploadBody::Bytes(bytes) => {
                *upload = Some(UploadBody::Bytes(bytes.clone()));
                let total = bytes.len() as u64;
                (stream::iter([Ok(bytes)]).boxed(), Some(total))
            }
            UploadBody::File(path) => {
                let file = File::open(&path).await.map_err(TransportError::network)?;
                let total = file.metadata().await.map_err(TransportError::network)?.len();
                *upload = Some(UploadBody::File(path));
                (read_chunks(file), Some(total))
            }
            UploadBody::Stream { stream, length } => (stream, length),
        };

        sent.store(0, Ordering::Relaxed);
        let counter = sent.clone();
        let events = self.events.clone();
        let task = self.task;
        Ok(Some(Body::wrap_stream(chunks.inspect_ok(move |chunk| {
            let len = chunk.len() as u64;
            let sent = counter.fetch_add(len, Ordering::Relaxed) + len;
            events.emit(task, TransportEvent::UploadProgress { sent, total });
        }))))
    }

    async fn data(
        &mut self,
        request: &WireRequest,
        mut upload: Option<UploadBody>,
    ) -> std::result::Result<TaskMetrics, TransportError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.check_trust(&request.url).await?;

        let replayable = !matches!(upload, Some(UploadBody::Stream { .. }));
        let sent = Arc::new(AtomicU64::new(0));
        let mut credential: Option<Credential> = None;
        let mut failures = 0;
        let response = loop {
            let mut builder = prepare(&self.client, request)?;
            if let Some(credential) = &credential {
                builder = builder.basic_auth(credential.user(), Some(credential.password()));
            }
            if let Some(body) = self.body(request, &mut upload, &sent).await? {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(transport_error)?;
            if response.status() != StatusCode::UNAUTHORIZED {
                break response;
            }
            let Some(kind) = auth_challenge(&request.url, response.headers()) else {
                break response;
            };
            match self.challenge(kind, failures).await {
                ChallengeDisposition::UseCredential(answer) if replayable => {
                    credential = Some(answer);
                    failures += 1;
                }
                ChallengeDisposition::CancelChallenge => return Err(TransportError::Cancelled),
                _ => break response,
            }
        };

        self.emit(TransportEvent::Response(response_head(&response)));
        let mut received = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport_error)?;
            if !self.running().await {
                return Err(TransportError::Cancelled);
            }
            received += chunk.len() as u64;
            self.emit(TransportEvent::Data(chunk));
        }

        Ok(TaskMetrics {
            started_at,
            duration: clock.elapsed(),
            bytes_sent: sent.load(Ordering::Relaxed),
            bytes_received: received,
        })
    }

    async fn download(
        &mut self,
        request: Option<&WireRequest>,
        state: &DownloadState,
    ) -> std::result::Result<TaskMetrics, TransportError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let (url, mut builder) = match request {
            Some(request) => (request.url.clone(), prepare(&self.client, request)?),
            None => {
                let url = Url::parse(&state.url).map_err(|e| TransportError::Other(e.to_string()))?;
                (url.clone(), self.client.get(url))
            }
        };
        self.check_trust(&url).await?;

        let offset = state.written.load(Ordering::Acquire);
        if offset > 0 {
            builder = builder.header(header::RANGE, format!("bytes={offset}-"));
            if let Some(validator) = state.validator() {
                builder = builder.header(header::IF_RANGE, validator);
            }
        }
        let response = builder.send().await.map_err(transport_error)?;

        let offset = if response.status() == StatusCode::PARTIAL_CONTENT { offset } else { 0 };
        let total = response.content_length().map(|length| length + offset);
        state.set_validator(validator(response.headers()));

        let mut file = open_partial(&state.partial, offset).await.map_err(TransportError::network)?;
        state.written.store(offset, Ordering::Release);

        self.emit(TransportEvent::Response(response_head(&response)));
        if offset > 0 {
            trace!("{} resumed at {offset}", self.task);
            self.emit(TransportEvent::DownloadResumed { offset, total });
        }

        let mut received = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport_error)?;
            if !self.running().await {
                return Err(TransportError::Cancelled);
            }
            file.write_all(&chunk).await.map_err(TransportError::network)?;
            file.flush().await.map_err(TransportError::network)?;
            received += chunk.len() as u64;
            let written = offset + received;
            state.written.store(written, Ordering::Release);
            self.emit(TransportEvent::DownloadProgress { written, total });
        }
        drop(file);

        self.emit(TransportEvent::DownloadFinished {
            location: state.partial.clone(),
        });
        Ok(TaskMetrics {
            started_at,
            duration: clock.elapsed(),
            bytes_sent: 0,
            bytes_received: received,
        })
    }
}

fn prepare(client: &Client, request: &WireRequest) -> std::result::Result<RequestBuilder, TransportError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|e| TransportError::Other(e.to_string()))?;
    let mut builder = client.request(method, request.url.clone());
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    if request.cache_policy == CachePolicy::ReloadIgnoringLocalCacheData {
        builder = builder.header(header::CACHE_CONTROL, "no-cache");
    }
    if !request.timeout.is_zero() {
        builder = builder.timeout(request.timeout);
    }
    Ok(builder)
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::network(error)
    }
}

fn response_head(response: &reqwest::Response) -> ResponseHead {
    ResponseHead::new(response.url().clone(), response.status().as_u16(), headers(response.headers()))
}

fn headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        match value.to_str() {
            Ok(value) => headers.insert(name.as_str(), value),
            Err(_) => trace!("skipping non-ASCII header {name}"),
        }
    }
    headers
}

fn validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ETAG)
        .or_else(|| headers.get(header::LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn auth_challenge(url: &Url, headers: &HeaderMap) -> Option<ChallengeKind> {
    let value = headers.get(header::WWW_AUTHENTICATE)?.to_str().ok()?.trim();
    let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));
    let realm = params
        .split(',')
        .filter_map(|param| param.trim().strip_prefix("realm="))
        .map(|realm| realm.trim_matches('"').to_string())
        .next();
    Some(ChallengeKind::HttpAuth {
        host: url.host_str().unwrap_or_default().to_string(),
        realm,
        scheme: scheme.to_string(),
    })
}

/// Open the partial file for writing at `offset`, truncating anything past it.
async fn open_partial(path: &Path, offset: u64) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    if offset == 0 {
        return OpenOptions::new().write(true).create(true).truncate(true).open(path).await;
    }
    let mut file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::End(0)).await?;
    Ok(file)
}

fn read_chunks(file: File) -> BoxStream<'static, io::Result<Bytes>> {
    stream::try_unfold(file, |mut file| async move {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);
        Ok::<_, io::Error>(Some((Bytes::from(buffer), file)))
    })
    .boxed()
}
