//! Multipart upload orchestration
//!
//! The coordinator plans the parts, opens a remote session, runs a fixed
//! pool of workers over the plan and finally commits or aborts the
//! session. Workers pull the next unclaimed part from a shared iterator
//! and report back over a channel; the coordinator is the only writer of
//! the session state.
//!
//! After the first failure no worker claims another part. Parts already
//! in flight are allowed to finish their current network call before the
//! session is aborted, so the abort never races an upload of ours.
//!
//! Dropping the upload future cancels the workers and hands the session
//! to a spawned task that aborts it.

use crate::{AbortSignal, PartUploader, SessionClient, UploadError, UploadSession};
use parcel_core::integrity::composite_etag;
use parcel_core::{
    ByteSource, CoreError, FileSource, ObjectId, ObjectTarget, PartError, PartIter, PartPlan,
    PartResult, RetryPolicy, SessionId, SessionState, UploadConfig,
};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Tuning for one [`UploadCoordinator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub part_size: u64,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub part_timeout: Option<Duration>,
}

impl UploadOptions {
    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(UploadOptions {
            part_size: config.part_size_bytes,
            concurrency: config.concurrency,
            retry: config.retry_policy(),
            part_timeout: config.part_timeout(),
        })
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            part_size: parcel_core::DEFAULT_PART_SIZE,
            concurrency: parcel_core::DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            part_timeout: None,
        }
    }
}

/// Summary of a committed upload
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub object: ObjectId,
    pub session_id: SessionId,
    /// Results in ascending part order
    pub parts: Vec<PartResult>,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl UploadReport {
    /// Attempts beyond the first, summed over all parts
    pub fn retries(&self) -> u32 {
        self.parts.iter().map(|p| p.attempts.saturating_sub(1)).sum()
    }

    /// Composite fingerprint of the bytes that were sent
    pub fn local_etag(&self) -> parcel_core::ETag {
        composite_etag(self.parts.iter().map(|p| &p.digest))
    }

    /// Compare the remote object ETag with [`Self::local_etag`].
    ///
    /// `None` when the remote reported no object ETag.
    pub fn etag_matches(&self) -> Option<bool> {
        self.object
            .etag
            .as_ref()
            .map(|remote| *remote == self.local_etag())
    }
}

type PartOutcome = Result<PartResult, PartError>;

/// Owns multipart sessions against one remote
pub struct UploadCoordinator<C> {
    client: Arc<C>,
    options: UploadOptions,
}

impl<C> UploadCoordinator<C>
where
    C: SessionClient + 'static,
{
    pub fn new(client: C, options: UploadOptions) -> Result<Self, UploadError> {
        if options.part_size == 0 {
            return Err(CoreError::invalid_config("part size must be positive").into());
        }
        if options.concurrency == 0 {
            return Err(CoreError::invalid_config("concurrency must be positive").into());
        }
        Ok(UploadCoordinator {
            client: Arc::new(client),
            options,
        })
    }

    pub fn from_config(client: C, config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(client, UploadOptions::from_config(config)?)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload the file named by `config` to its configured target
    pub async fn upload_config(
        &self,
        config: &UploadConfig,
    ) -> Result<UploadReport, UploadError> {
        let target = config.target()?;
        self.upload_file(&config.source_path, target).await
    }

    /// Upload a local file
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        target: ObjectTarget,
    ) -> Result<UploadReport, UploadError> {
        let path = path.as_ref();
        let source = FileSource::open(path)
            .await
            .map_err(|source| UploadError::SourceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        self.upload(target, Arc::new(source)).await
    }

    /// Upload everything `source` holds to `target`, all or nothing
    pub async fn upload<S>(
        &self,
        target: ObjectTarget,
        source: Arc<S>,
    ) -> Result<UploadReport, UploadError>
    where
        S: ByteSource + 'static,
    {
        let span = info_span!("upload", bucket = %target.bucket, key = %target.key);
        self.run(target, source).instrument(span).await
    }

    async fn run<S>(
        &self,
        target: ObjectTarget,
        source: Arc<S>,
    ) -> Result<UploadReport, UploadError>
    where
        S: ByteSource + 'static,
    {
        let started = Instant::now();

        // Planning: nothing touches the remote until the plan is valid
        let plan = PartPlan::new(source.len(), self.options.part_size)?;
        plan.check_limits(&self.client.limits())?;
        let mut session = UploadSession::new(plan);

        let session_id = self
            .client
            .initiate(&target)
            .await
            .map_err(|source| UploadError::InitiateFailure {
                target: target.clone(),
                source,
            })?;
        let mut cleanup = AbortOnDrop::new(self.client.clone(), session_id.clone());
        session.transition(SessionState::Active)?;
        info!(
            session_id = %session_id,
            file_size = plan.file_size(),
            part_size = plan.part_size(),
            parts = plan.len(),
            "multipart session started"
        );

        let failures = self.dispatch(&mut session, &session_id, source).await;

        if !failures.iter().all(PartError::is_cancellation) || !session.is_complete() {
            cleanup.disarm();
            return Err(self.abort(session, session_id, failures).await);
        }

        // From here on a failure is a commit failure, which is never aborted
        cleanup.disarm();

        session.transition(SessionState::Completing)?;
        let parts = session.completed_parts();
        debug!(session_id = %session_id, parts = parts.len(), "committing");

        let object = self
            .client
            .complete_upload(&session_id, &parts)
            .await
            .map_err(|source| {
                warn!(
                    session_id = %session_id,
                    error = %source,
                    "commit failed, session left for manual cleanup"
                );
                UploadError::CommitFailure {
                    session_id: session_id.clone(),
                    source,
                }
            })?;
        session.transition(SessionState::Committed)?;

        let report = UploadReport {
            object,
            session_id,
            total_bytes: session.file_size(),
            parts: session.into_results(),
            elapsed: started.elapsed(),
        };
        info!(
            object = %report.object,
            bytes = report.total_bytes,
            retries = report.retries(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "upload committed"
        );
        Ok(report)
    }

    /// Run the worker pool until every worker has exited.
    ///
    /// Returns the part failures; successes are recorded on `session`.
    async fn dispatch<S>(
        &self,
        session: &mut UploadSession,
        session_id: &SessionId,
        source: Arc<S>,
    ) -> Vec<PartError>
    where
        S: ByteSource + 'static,
    {
        let signal = AbortSignal::new();
        let uploader = Arc::new(
            PartUploader::new(self.client.clone(), source, self.options.retry, signal.clone())
                .with_part_timeout(self.options.part_timeout),
        );
        let queue = Arc::new(Mutex::new(session.plan().iter()));
        let worker_count = self.options.concurrency.min(session.plan().len() as usize);
        let (tx, mut rx) = mpsc::channel::<PartOutcome>(worker_count);

        // Dropping the set aborts the workers
        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let worker_span = info_span!("worker", worker);
            workers.spawn(
                run_worker(uploader.clone(), session_id.clone(), queue.clone(), tx.clone())
                    .instrument(worker_span),
            );
        }
        drop(tx);

        let mut failures = Vec::new();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(result) => {
                    let part_number = result.part_number;
                    if !session.record(result) {
                        warn!(part_number, "ignoring duplicate part result");
                    }
                }
                Err(error) => {
                    if !error.is_cancellation() {
                        signal.trigger();
                        warn!(
                            part_number = error.part_number(),
                            error = %error,
                            "part failed, no new parts will start"
                        );
                    }
                    failures.push(error);
                }
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(join_error) = result {
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
            }
        }

        failures.sort_by_key(PartError::part_number);
        failures
    }

    async fn abort(
        &self,
        mut session: UploadSession,
        session_id: SessionId,
        failures: Vec<PartError>,
    ) -> UploadError {
        if let Err(error) = session.transition(SessionState::Aborting) {
            return error;
        }
        info!(
            session_id = %session_id,
            completed = session.completed_count(),
            planned = session.plan().len(),
            "aborting multipart session"
        );

        let abort_error = match self.client.abort_upload(&session_id).await {
            Ok(()) => None,
            Err(error) => {
                warn!(
                    session_id = %session_id,
                    error = %error,
                    "abort failed, parts may linger on the remote"
                );
                Some(error)
            }
        };
        if let Err(error) = session.transition(SessionState::Aborted) {
            return error;
        }

        UploadError::UploadFailed {
            session_id,
            failures,
            abort_error,
        }
    }
}

/// Aborts the remote session when an upload is dropped before it decided
/// between commit and abort
struct AbortOnDrop<C: SessionClient + 'static> {
    client: Arc<C>,
    session_id: Option<SessionId>,
}

impl<C: SessionClient + 'static> AbortOnDrop<C> {
    fn new(client: Arc<C>, session_id: SessionId) -> Self {
        AbortOnDrop {
            client,
            session_id: Some(session_id),
        }
    }

    fn disarm(&mut self) {
        self.session_id = None;
    }
}

impl<C: SessionClient + 'static> Drop for AbortOnDrop<C> {
    fn drop(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "upload dropped without a runtime, session left open");
            return;
        };

        warn!(session_id = %session_id, "upload dropped, aborting session");
        let client = self.client.clone();
        runtime.spawn(async move {
            if let Err(error) = client.abort_upload(&session_id).await {
                warn!(session_id = %session_id, error = %error, "abort of dropped upload failed");
            }
        });
    }
}

async fn run_worker<C, S>(
    uploader: Arc<PartUploader<C, S>>,
    session_id: SessionId,
    queue: Arc<Mutex<PartIter>>,
    results: mpsc::Sender<PartOutcome>,
) where
    C: SessionClient,
    S: ByteSource,
{
    loop {
        let next = {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            if uploader.signal().is_triggered() {
                None
            } else {
                queue.next()
            }
        };
        let Some(spec) = next else {
            break;
        };

        let outcome = uploader.upload_part(&session_id, spec).await;
        if let Err(error) = &outcome {
            if !error.is_cancellation() {
                // stop the other workers before the coordinator hears about it
                uploader.signal().trigger();
            }
        }
        if results.send(outcome).await.is_err() {
            break;
        }
    }
    debug!("worker finished");
}
