use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::callback::{CallbackContext, DataStreamHandler, DestinationFn, ProgressHandler};
use super::engine::TransferShared;
use super::transport::{Challenge, ChallengeDisposition, ChallengeKind, ServerTrustPolicy, TransportEvent};
use crate::core::RetryCounter;
use crate::data::{Credential, Progress, RequestId, ResponseHead, TaskId, TaskMetrics};
use crate::error::{Error, Result, TransportError};

/// Caller-supplied callbacks and policies of one logical request, copied
/// into the record of every attempt.
#[derive(Clone)]
pub(crate) struct TransferHooks {
    pub context:         CallbackContext,
    pub progress:        Option<ProgressHandler>,
    pub upload_progress: Option<ProgressHandler>,
    pub data_stream:     Option<DataStreamHandler>,
    pub destination:     Option<DestinationFn>,
    pub credential:      Option<Credential>,
    pub trust_policy:    Option<Arc<dyn ServerTrustPolicy>>,
}

impl TransferHooks {
    pub fn new(context: CallbackContext) -> Self {
        Self {
            context,
            progress: None,
            upload_progress: None,
            data_stream: None,
            destination: None,
            credential: None,
            trust_policy: None,
        }
    }
}

/// Raw result of one task, before serialization.
#[derive(Debug, Clone)]
pub(crate) struct TaskOutcome {
    pub task:          TaskId,
    pub head:          Option<ResponseHead>,
    pub data:          Option<Bytes>,
    pub download_file: Option<PathBuf>,
    pub resume_data:   Option<Bytes>,
    pub metrics:       Option<TaskMetrics>,
    pub error:         Option<Error>,
    pub retry:         RetryCounter,
}

impl TaskOutcome {
    /// Outcome of a task whose completion never arrived.
    pub fn cancelled(task: TaskId, retry: RetryCounter) -> Self {
        Self {
            task,
            head: None,
            data: None,
            download_file: None,
            resume_data: None,
            metrics: None,
            error: Some(TransportError::Cancelled.into()),
            retry,
        }
    }
}

/// Per-task state accumulated from transport events.
pub(crate) struct TaskRecord {
    request_id:      RequestId,
    hooks:           TransferHooks,
    progress:        Progress,
    upload_progress: Progress,
    head:            Option<ResponseHead>,
    data:            Option<BytesMut>,
    download_file:   Option<PathBuf>,
    metrics:         Option<TaskMetrics>,
    error:           Option<Error>,
    retry:           RetryCounter,
    completion:      Option<oneshot::Sender<TaskOutcome>>,
}

impl TaskRecord {
    pub fn new(
        request_id: RequestId,
        hooks: TransferHooks,
        retry: RetryCounter,
        completion: oneshot::Sender<TaskOutcome>,
    ) -> Self {
        Self {
            request_id,
            hooks,
            progress: Progress::default(),
            upload_progress: Progress::default(),
            head: None,
            data: None,
            download_file: None,
            metrics: None,
            error: None,
            retry,
            completion: Some(completion),
        }
    }

    pub fn request_id(&self) -> RequestId { self.request_id }

    /// Complete with a cancellation error, ignoring anything the transport
    /// reports later.
    pub fn finish_cancelled(mut self, task: TaskId, resume_data: Option<Bytes>) {
        let outcome = TaskOutcome {
            task,
            head: self.head.take(),
            data: self.data.take().map(BytesMut::freeze),
            download_file: None,
            resume_data,
            metrics: self.metrics.take(),
            error: Some(TransportError::Cancelled.into()),
            retry: self.retry,
        };
        if let Some(completion) = self.completion.take() {
            self.hooks.context.dispatch(move || {
                let _ = completion.send(outcome);
            });
        }
    }

    fn disposition(&mut self, challenge: &Challenge) -> ChallengeDisposition {
        match &challenge.kind {
            ChallengeKind::ServerTrust { host } => match &self.hooks.trust_policy {
                None => ChallengeDisposition::PerformDefaultHandling,
                Some(policy) if policy.evaluate(host) => ChallengeDisposition::AcceptServerTrust,
                Some(_) => {
                    self.error = Some(TransportError::ServerTrustRejected { host: host.clone() }.into());
                    ChallengeDisposition::CancelChallenge
                }
            },
            ChallengeKind::HttpAuth { .. } if challenge.previous_failure_count > 0 => {
                ChallengeDisposition::RejectProtectionSpace
            }
            ChallengeKind::HttpAuth { .. } => match &self.hooks.credential {
                Some(credential) => ChallengeDisposition::UseCredential(credential.clone()),
                None => ChallengeDisposition::PerformDefaultHandling,
            },
        }
    }

    fn into_outcome(mut self, task: TaskId, error: Option<TransportError>, resume_data: Option<Bytes>) -> Effects {
        let mut effects = Effects::default();
        // Errors recorded by the session describe the failure better than
        // the transport's reaction to them.
        let error = self.error.take().or(error.map(Error::from));
        let succeeded = error.is_none() && self.head.as_ref().is_none_or(|h| (200..=299).contains(&h.status));

        if let Some(handler) = &self.hooks.progress {
            if succeeded && !self.progress.is_finished() {
                let done = self.progress.completed_unit_count;
                effects.progress(handler, Progress::new(done, Some(done)));
            }
        }

        let outcome = TaskOutcome {
            task,
            head: self.head.take(),
            data: self.data.take().map(BytesMut::freeze),
            download_file: self.download_file.take(),
            resume_data,
            metrics: self.metrics.take(),
            error,
            retry: self.retry,
        };
        if let Some(completion) = self.completion.take() {
            effects.jobs.push(Box::new(move || {
                let _ = completion.send(outcome);
            }));
        }
        effects.context = Some(self.hooks.context.clone());
        effects
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Work collected under the registry lock and run after it is released.
#[derive(Default)]
struct Effects {
    context: Option<CallbackContext>,
    jobs:    Vec<Job>,
    reply:   Option<(oneshot::Sender<ChallengeDisposition>, ChallengeDisposition)>,
}

impl Effects {
    fn progress(&mut self, handler: &ProgressHandler, progress: Progress) {
        let handler = handler.clone();
        self.jobs.push(Box::new(move || handler(progress)));
    }

    fn run(self) {
        if let Some((reply, disposition)) = self.reply {
            let _ = reply.send(disposition);
        }
        let Some(context) = self.context else { return };
        for job in self.jobs {
            context.dispatch(job);
        }
    }
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<TaskId, TaskRecord>,
    owners:  HashMap<TaskId, Weak<TransferShared>>,
}

/// Thread-safe map from transport tasks to the transfers that own them.
///
/// The lock is never held while caller callbacks run.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, RegistryState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Register `record` for `task`. A task that is already registered keeps
    /// its record and `false` is returned.
    pub(crate) fn register(&self, task: TaskId, record: TaskRecord, owner: &Arc<TransferShared>) -> bool {
        let mut state = self.lock();
        if state.records.contains_key(&task) {
            return false;
        }
        debug!("registering {task} for {}", record.request_id());
        state.records.insert(task, record);
        state.owners.insert(task, Arc::downgrade(owner));
        true
    }

    pub(crate) fn unregister(&self, task: TaskId) -> Option<TaskRecord> {
        let mut state = self.lock();
        state.owners.remove(&task);
        let record = state.records.remove(&task);
        if record.is_some() {
            debug!("unregistered {task}");
        }
        record
    }

    /// Move the record of `from` to `to`.
    pub fn rekey(&self, from: TaskId, to: TaskId) -> bool {
        let mut state = self.lock();
        Self::rekey_locked(&mut state, from, to)
    }

    fn rekey_locked(state: &mut RegistryState, from: TaskId, to: TaskId) -> bool {
        let Some(record) = state.records.remove(&from) else {
            return false;
        };
        state.records.insert(to, record);
        if let Some(owner) = state.owners.remove(&from) {
            if let Some(shared) = owner.upgrade() {
                shared.set_task(Some(to));
            }
            state.owners.insert(to, owner);
        }
        debug!("re-homed {from} as {to}");
        true
    }

    /// Transfers that currently have a registered task.
    pub(crate) fn owners(&self) -> Vec<Arc<TransferShared>> {
        self.lock().owners.values().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize { self.lock().records.len() }

    pub fn is_empty(&self) -> bool { self.lock().records.is_empty() }

    pub fn contains(&self, task: TaskId) -> bool { self.lock().records.contains_key(&task) }

    /// Apply one transport event. Events for unknown tasks are dropped.
    pub(crate) async fn handle_event(&self, task: TaskId, event: TransportEvent) {
        if let TransportEvent::DownloadFinished { location } = event {
            self.finish_download(task, location).await;
            return;
        }

        let effects = {
            let mut state = self.lock();
            self.apply(&mut state, task, event)
        };
        effects.run();
    }

    fn apply(&self, state: &mut RegistryState, task: TaskId, event: TransportEvent) -> Effects {
        match event {
            TransportEvent::Completed { error, resume_data } => {
                state.owners.remove(&task);
                match state.records.remove(&task) {
                    Some(record) => {
                        debug!("{task} completed");
                        record.into_outcome(task, error, resume_data)
                    }
                    None => {
                        trace!("dropping completion of unknown {task}");
                        Effects::default()
                    }
                }
            }
            TransportEvent::BecameDownload { task: replacement } => {
                Self::rekey_locked(state, task, replacement);
                Effects::default()
            }
            event => match state.records.get_mut(&task) {
                Some(record) => Self::apply_to_record(record, task, event),
                None => {
                    trace!("dropping event for unknown {task}: {event:?}");
                    Effects::default()
                }
            },
        }
    }

    fn apply_to_record(record: &mut TaskRecord, task: TaskId, event: TransportEvent) -> Effects {
        let mut effects = Effects {
            context: Some(record.hooks.context.clone()),
            ..Effects::default()
        };

        match event {
            TransportEvent::Challenge { challenge, reply } => {
                let disposition = record.disposition(&challenge);
                trace!("{task} challenge {:?} -> {disposition:?}", challenge.kind);
                effects.reply = Some((reply, disposition));
            }
            TransportEvent::Response(head) => {
                trace!("{task} response {}", head.status);
                record.progress.total_unit_count = head.expected_content_length();
                record.head = Some(head);
            }
            TransportEvent::Data(chunk) => {
                trace!("{task} received {} bytes", chunk.len());
                record.progress.advance_by(chunk.len() as u64);
                if let Some(handler) = &record.hooks.progress {
                    effects.progress(handler, record.progress);
                }
                if let Some(handler) = record.hooks.data_stream.clone() {
                    let chunk = chunk.clone();
                    effects.jobs.push(Box::new(move || handler(chunk)));
                }
                record.data.get_or_insert_with(BytesMut::new).extend_from_slice(&chunk);
            }
            TransportEvent::UploadProgress { sent, total } => {
                record.upload_progress.total_unit_count = total;
                record.upload_progress.advance_to(sent);
                if let Some(handler) = &record.hooks.upload_progress {
                    effects.progress(handler, record.upload_progress);
                }
            }
            TransportEvent::DownloadProgress { written: offset, total }
            | TransportEvent::DownloadResumed { offset, total } => {
                if total.is_some() {
                    record.progress.total_unit_count = total;
                }
                record.progress.advance_to(offset);
                if let Some(handler) = &record.hooks.progress {
                    effects.progress(handler, record.progress);
                }
            }
            TransportEvent::Metrics(metrics) => record.metrics = Some(metrics),
            other => warn!("{task} unexpected event {other:?}"),
        }
        effects
    }

    async fn finish_download(&self, task: TaskId, location: PathBuf) {
        let (destination, head) = {
            let state = self.lock();
            let Some(record) = state.records.get(&task) else {
                trace!("dropping finished download of unknown {task}");
                return;
            };
            (record.hooks.destination.clone(), record.head.clone())
        };
        let target = match destination {
            Some(destination) => destination(&location, head.as_ref()),
            None => default_destination(&location, head.as_ref()),
        };

        let moved = move_file(&location, target).await;

        let mut state = self.lock();
        let Some(record) = state.records.get_mut(&task) else {
            return;
        };
        match moved {
            Ok(path) => {
                debug!("{task} download moved to {}", path.display());
                record.download_file = Some(path);
            }
            Err(error) => {
                warn!("{task} download could not be moved: {error}");
                record.error = Some(error);
            }
        }
    }
}

/// `~/Downloads/<suggested filename>`.
pub(crate) fn default_destination(temporary: &Path, head: Option<&ResponseHead>) -> PathBuf {
    let name = head
        .and_then(ResponseHead::suggested_filename)
        .or_else(|| temporary.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "download".to_string());
    home::home_dir()
        .map(|home| home.join("Downloads"))
        .unwrap_or_else(std::env::temp_dir)
        .join(name)
}

/// Move `from` to `to`, replacing an existing file.
async fn move_file(from: &Path, to: PathBuf) -> Result<PathBuf> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await.map_err(|e| Error::io(parent, e))?;
    }
    if fs::try_exists(&to).await.unwrap_or(false) {
        fs::remove_file(&to).await.map_err(|e| Error::io(&to, e))?;
    }

    if fs::rename(from, &to).await.is_err() {
        // Rename fails across file systems.
        fs::copy(from, &to).await.map_err(|e| Error::io(&to, e))?;
        if let Err(error) = fs::remove_file(from).await {
            warn!("could not remove {}: {error}", from.display());
        }
    }
    Ok(to)
}
