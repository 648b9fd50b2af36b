use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use courier_multipart::MultipartFormData;
use once_cell::sync::Lazy;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::{TaskOutcome, TaskRecord, TransferHooks};
use super::session::Session;
use super::transfer::{Downloadable, Uploadable};
use super::transport::{DownloadSource, StreamProvider, TaskRequest, UploadBody};
use crate::core::{
    DefaultRetryPolicy, MiddlewareChain, RequestContext, RetryCounter, RetryPolicy, serialize_data, serialize_download,
    validate_content_type,
};
use crate::data::{DataResponse, DownloadResponse, RequestBuilder, RequestId, Response, TaskId, WireRequest};
use crate::error::{ConstructionFailure, Error, Result, TransportError};
use crate::request::{ApiRequest, RetrySetting};

/// Lifecycle of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    #[default]
    Idle,
    Preparing,
    InFlight,
    Retrying,
    Completed,
    Cleared,
}

#[derive(Debug, Default)]
struct TransferState {
    phase:       TransferPhase,
    task:        Option<TaskId>,
    /// `Some(produce_resume_data)` once cancellation was requested.
    cancel:      Option<bool>,
    resume_data: Option<Bytes>,
    url:         Option<String>,
}

/// State of a transfer shared between the engine, its handles and the registry.
#[derive(Debug)]
pub(crate) struct TransferShared {
    pub request_id: RequestId,
    state:          Mutex<TransferState>,
    notify:         Notify,
}

impl TransferShared {
    pub fn new(url: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            request_id: RequestId::next(),
            state:      Mutex::new(TransferState {
                url,
                ..TransferState::default()
            }),
            notify:     Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TransferState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn phase(&self) -> TransferPhase { self.lock().phase }

    fn set_phase(&self, phase: TransferPhase) {
        debug!("{} -> {phase:?}", self.request_id);
        self.lock().phase = phase;
    }

    pub fn task(&self) -> Option<TaskId> { self.lock().task }

    pub fn set_task(&self, task: Option<TaskId>) { self.lock().task = task; }

    pub fn url(&self) -> Option<String> { self.lock().url.clone() }

    pub fn resume_data(&self) -> Option<Bytes> { self.lock().resume_data.clone() }

    pub fn set_resume_data(&self, data: Bytes) { self.lock().resume_data = Some(data); }

    pub fn is_cancelled(&self) -> bool { self.lock().cancel.is_some() }

    /// Flag the transfer as cancelled.
    ///
    /// Returns `None` if there is nothing to cancel (already cancelled or
    /// finished), else the task currently in flight, if any.
    pub fn request_cancel(&self, produce_resume_data: bool) -> Option<Option<TaskId>> {
        let task = {
            let mut state = self.lock();
            if state.cancel.is_some() || matches!(state.phase, TransferPhase::Completed | TransferPhase::Cleared) {
                return None;
            }
            state.cancel = Some(produce_resume_data);
            state.task
        };
        self.notify.notify_one();
        Some(task)
    }

    /// Make `task` current. Returns the pending cancellation, if one was
    /// requested before the task existed.
    fn install(&self, task: TaskId) -> Option<bool> {
        let mut state = self.lock();
        state.task = Some(task);
        state.cancel
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
    async fn wait_retry_delay(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.is_cancelled(),
            _ = self.notify.notified() => false,
        }
    }
}

pub(crate) enum Payload {
    Data,
    Upload(Uploadable),
    Download(Downloadable),
}

/// Everything needed to run one logical request.
pub(crate) struct Transfer {
    pub session:    Session,
    pub api:        Option<Arc<dyn ApiRequest>>,
    pub payload:    Payload,
    pub hooks:      TransferHooks,
    pub acceptable: Option<Vec<String>>,
    pub shared:     Arc<TransferShared>,
}

impl Transfer {
    /// Drive the request through preparation, attempts and retries.
    ///
    /// Construction failures are returned as `Err` before anything is
    /// submitted; every other failure ends up on the response.
    pub async fn run(self) -> Result<Response> {
        let Transfer {
            session,
            api,
            payload,
            hooks,
            acceptable,
            shared,
        } = self;

        let chain = MiddlewareChain::new(api.as_ref().map(|api| api.middlewares()).unwrap_or_default());
        let retry_setting = api.as_ref().map(|api| api.retry()).unwrap_or_default();

        shared.set_phase(TransferPhase::Preparing);
        let plan = match Plan::prepare(&session, api.as_deref(), &chain, payload).await {
            Ok(plan) => plan,
            Err(error) => {
                debug!("{} failed to prepare: {error}", shared.request_id);
                shared.set_phase(TransferPhase::Cleared);
                return Err(error);
            }
        };
        let policy = retry_policy(&session, retry_setting);

        let mut context = RequestContext {
            request_id: shared.request_id,
            task_id:    None,
            request:    plan.request().cloned(),
            attempt:    0,
        };
        let mut retry = RetryCounter::default();
        let mut resume_data: Option<Bytes> = None;

        let response = loop {
            let (completion, outcome) = oneshot::channel();
            let task = session
                .transport()
                .submit(plan.task_request(resume_data.as_ref()), session.events());
            let record = TaskRecord::new(shared.request_id, hooks.clone(), retry, completion);
            session.registry().register(task, record, &shared);
            context.task_id = Some(task);

            match shared.install(task) {
                Some(produce_resume_data) => session.cancel_task(&shared, task, produce_resume_data),
                None => {
                    chain.before_send(&context);
                    shared.set_phase(TransferPhase::InFlight);
                    session.transport().resume(task);
                }
            }

            let mut outcome = outcome.await.unwrap_or_else(|_| TaskOutcome::cancelled(task, retry));
            retry = outcome.retry;
            if outcome.resume_data.is_some() {
                resume_data = outcome.resume_data.clone();
            }
            let response = plan.response(&outcome, acceptable.as_deref());

            let Some(error) = response.error() else {
                break response;
            };
            if error.is_cancelled() || error.is_trust_rejected() || shared.is_cancelled() {
                break response;
            }
            let Some(policy) = &policy else {
                break response;
            };
            let decision = policy.retry(&mut retry, error);
            if !decision.should_retry {
                break response;
            }

            warn!(
                "{} attempt {} failed: {error}, retrying in {:?}",
                shared.request_id, context.attempt, decision.delay
            );
            shared.set_task(None);
            shared.set_phase(TransferPhase::Retrying);
            if !shared.wait_retry_delay(decision.delay).await {
                outcome.error = Some(TransportError::Cancelled.into());
                break plan.response(&outcome, acceptable.as_deref());
            }
            context.attempt += 1;
        };

        if let Some(data) = response.resume_data() {
            shared.set_resume_data(data.clone());
        }
        shared.set_phase(TransferPhase::Completed);

        let response = chain.after_receive(response);
        chain.did_stop(&context);

        drop(plan);
        shared.set_phase(TransferPhase::Cleared);
        Ok(response)
    }
}

fn retry_policy(session: &Session, setting: RetrySetting) -> Option<Arc<dyn RetryPolicy>> {
    match setting {
        RetrySetting::Disabled => None,
        RetrySetting::Policy(policy) => Some(policy),
        RetrySetting::SessionDefault => {
            let config = session.config();
            Some(Arc::new(DefaultRetryPolicy::new(
                config.max_retries,
                config.retry_delay_duration(),
            )))
        }
    }
}

/// A prepared request, ready to be turned into tasks any number of times.
enum Plan {
    Data {
        request: WireRequest,
    },
    Upload {
        request: WireRequest,
        body:    PreparedBody,
    },
    Download {
        request: Option<WireRequest>,
        source:  DownloadSource,
    },
}

enum PreparedBody {
    Bytes(Bytes),
    File(PathBuf),
    Stream {
        provider: StreamProvider,
        length:   Option<u64>,
    },
    Spooled(SpoolFile),
}

impl Plan {
    async fn prepare(
        session: &Session,
        api: Option<&dyn ApiRequest>,
        chain: &MiddlewareChain,
        payload: Payload,
    ) -> Result<Self> {
        match payload {
            Payload::Data => Ok(Plan::Data {
                request: build_request(session, api, chain)?,
            }),
            Payload::Upload(uploadable) => {
                let request = build_request(session, api, chain)?;
                let (request, body) = prepare_upload(session, request, uploadable).await?;
                Ok(Plan::Upload { request, body })
            }
            Payload::Download(Downloadable::Request) => {
                let request = build_request(session, api, chain)?;
                Ok(Plan::Download {
                    request: Some(request.clone()),
                    source:  DownloadSource::Request(request),
                })
            }
            Payload::Download(Downloadable::ResumeData(data)) => Ok(Plan::Download {
                request: None,
                source:  DownloadSource::ResumeData(data),
            }),
            Payload::Download(Downloadable::ResumeDataFile(path)) => {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| ConstructionFailure::ResumeDataUnreadable {
                        path:   path.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Plan::Download {
                    request: None,
                    source:  DownloadSource::ResumeData(Bytes::from(data)),
                })
            }
        }
    }

    fn request(&self) -> Option<&WireRequest> {
        match self {
            Plan::Data { request } | Plan::Upload { request, .. } => Some(request),
            Plan::Download { request, .. } => request.as_ref(),
        }
    }

    /// Task for the next attempt. Downloads continue from `resume_data` when
    /// an earlier attempt left some.
    fn task_request(&self, resume_data: Option<&Bytes>) -> TaskRequest {
        match self {
            Plan::Data { request } => TaskRequest::Data(request.clone()),
            Plan::Upload { request, body } => {
                let body = match body {
                    PreparedBody::Bytes(bytes) => UploadBody::Bytes(bytes.clone()),
                    PreparedBody::File(path) => UploadBody::File(path.clone()),
                    PreparedBody::Stream { provider, length } => UploadBody::Stream {
                        stream: provider(),
                        length: *length,
                    },
                    PreparedBody::Spooled(spool) => UploadBody::File(spool.path().to_path_buf()),
                };
                TaskRequest::Upload {
                    request: request.clone(),
                    body,
                }
            }
            Plan::Download { source, .. } => match resume_data {
                Some(data) => TaskRequest::Download(DownloadSource::ResumeData(data.clone())),
                None => TaskRequest::Download(source.clone()),
            },
        }
    }

    fn response(&self, outcome: &TaskOutcome, acceptable: Option<&[String]>) -> Response {
        match self {
            Plan::Data { request } | Plan::Upload { request, .. } => {
                let head = outcome.head.as_ref();
                let result = serialize_data(request.method, head, outcome.data.as_ref(), outcome.error.as_ref())
                    .and_then(|data| match (head, acceptable) {
                        (Some(head), Some(types)) => {
                            let types: Vec<&str> = types.iter().map(String::as_str).collect();
                            validate_content_type(head, &types, Some(&data)).map(|()| data)
                        }
                        _ => Ok(data),
                    });
                Response::Data(DataResponse::new(
                    request.clone(),
                    outcome.head.clone(),
                    outcome.data.clone(),
                    outcome.metrics.clone(),
                    result,
                ))
            }
            Plan::Download { request, .. } => Response::Download(DownloadResponse {
                request:       request.clone(),
                response:      outcome.head.clone(),
                download_file: outcome.download_file.clone(),
                resume_data:   outcome.resume_data.clone(),
                metrics:       outcome.metrics.clone(),
                result:        serialize_download(
                    outcome.head.as_ref(),
                    outcome.download_file.as_ref(),
                    outcome.error.as_ref(),
                ),
            }),
        }
    }
}

/// Defaults, then `configure`, then authorization and request headers, then
/// middlewares. Parameters are encoded last.
fn build_request(session: &Session, api: Option<&dyn ApiRequest>, chain: &MiddlewareChain) -> Result<WireRequest> {
    let config = session.config();
    let Some(api) = api else {
        return Err(ConstructionFailure::MissingUrl.into());
    };

    let mut builder = RequestBuilder::with_headers(api.url(), config.default_headers.clone())
        .method(api.method())
        .timeout(api.timeout().unwrap_or_else(|| config.default_timeout_duration()));
    builder = api.configure(builder);
    if api.credential().is_none() {
        builder = builder.authorization(&api.authorization());
    }
    builder = builder.merge_headers(&api.headers());
    builder = chain.prepare(builder);

    let request = builder.build()?;
    api.encoding().encode(request, &api.parameters())
}

async fn prepare_upload(
    session: &Session,
    mut request: WireRequest,
    uploadable: Uploadable,
) -> Result<(WireRequest, PreparedBody)> {
    let body = match uploadable {
        Uploadable::Data(bytes) => PreparedBody::Bytes(bytes),
        Uploadable::File(path) => PreparedBody::File(path),
        Uploadable::Stream { provider, length } => PreparedBody::Stream { provider, length },
        Uploadable::Multipart {
            mut form,
            memory_threshold,
        } => {
            let threshold = memory_threshold.unwrap_or(session.config().multipart_memory_threshold);
            request.headers.insert("Content-Type", form.content_type());
            request.headers.insert("Content-Length", form.encoded_length().to_string());

            if form.content_length() < threshold && !session.transport().is_background_session() {
                PreparedBody::Bytes(Bytes::from(form.encode()?))
            } else {
                PreparedBody::Spooled(spool(form).await?)
            }
        }
    };
    Ok((request, body))
}

/// Spool files in use by live transfers.
static ACTIVE_SPOOLS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn spool_directory() -> PathBuf { std::env::temp_dir().join("courier.upload").join("multipart.form.data") }

/// A multipart body written to disk, removed when dropped.
#[derive(Debug)]
struct SpoolFile {
    path: PathBuf,
}

impl SpoolFile {
    fn claim(path: PathBuf) -> Self {
        ACTIVE_SPOOLS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone());
        Self { path }
    }

    fn path(&self) -> &Path { &self.path }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!("could not remove spool file {}: {error}", self.path.display());
            }
            _ => {}
        }
        ACTIVE_SPOOLS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Clear leftovers of earlier runs, keeping files of live transfers.
fn clean_spool_directory(directory: &Path) {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return;
    };
    let active = ACTIVE_SPOOLS.lock().unwrap_or_else(PoisonError::into_inner).clone();
    for entry in entries.flatten() {
        let path = entry.path();
        if active.contains(&path) {
            continue;
        }
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(error) = removed {
            warn!("could not clean {}: {error}", path.display());
        }
    }
}

async fn spool(mut form: MultipartFormData) -> Result<SpoolFile> {
    let directory = spool_directory();
    let spool = SpoolFile::claim(directory.join(Uuid::new_v4().to_string()));
    let path = spool.path.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        clean_spool_directory(&directory);
        std::fs::create_dir_all(&directory).map_err(|e| Error::io(&directory, e))?;
        form.write_encoded_data(&path)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Runtime(Arc::new(io::Error::other(e))))??;

    debug!("spooled multipart body to {}", spool.path.display());
    Ok(spool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_requested_once() {
        let shared = TransferShared::new(None);
        shared.set_task(Some(TaskId(4)));
        assert_eq!(shared.request_cancel(true), Some(Some(TaskId(4))));
        assert_eq!(shared.request_cancel(false), None);
        assert!(shared.is_cancelled());
    }

    #[test]
    fn test_cancel_after_completion_is_ignored() {
        let shared = TransferShared::new(None);
        shared.set_phase(TransferPhase::Completed);
        assert_eq!(shared.request_cancel(false), None);
        assert!(!shared.is_cancelled());
    }

    #[test]
    fn test_install_reports_early_cancel() {
        let shared = TransferShared::new(None);
        assert_eq!(shared.request_cancel(true), Some(None));
        assert_eq!(shared.install(TaskId(1)), Some(true));
        assert_eq!(shared.task(), Some(TaskId(1)));
    }

    #[tokio::test]
    async fn test_retry_delay_interrupted_by_cancel() {
        let shared = TransferShared::new(None);
        let waiter = shared.clone();
        let wait = tokio::spawn(async move { waiter.wait_retry_delay(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        shared.request_cancel(false);
        assert!(!wait.await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_delay_elapses() {
        let shared = TransferShared::new(None);
        assert!(shared.wait_retry_delay(Duration::from_millis(1)).await);
    }

    #[test]
    fn test_spool_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body");
        std::fs::write(&path, b"x").unwrap();

        let spool = SpoolFile::claim(path.clone());
        assert!(ACTIVE_SPOOLS.lock().unwrap().contains(&path));
        drop(spool);

        assert!(!path.exists());
        assert!(!ACTIVE_SPOOLS.lock().unwrap().contains(&path));
    }

    #[test]
    fn test_cleaning_keeps_active_spools() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale");
        let live = dir.path().join("live");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&live, b"new").unwrap();
        let _guard = SpoolFile::claim(live.clone());

        clean_spool_directory(dir.path());

        assert!(!stale.exists());
        assert!(live.exists());
    }
}
