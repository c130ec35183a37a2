//! [`JobRegistry`] — starts imports as background tasks and hands out
//! opaque handles for polling and cancelling them.

use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rook_core::{game::SourceName, store::GameStore};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  Error, Result,
  events::ImportEvent,
  orchestrator::{ImportOrchestrator, ImportRequest, ImportSummary},
  progress::{JobProgress, Phase, ProgressReporter},
  transport::{HttpTransport, ReqwestTransport},
};

pub type JobId = Uuid;

/// Everything known about a job, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
  pub id:          JobId,
  pub source:      SourceName,
  pub identity:    String,
  pub progress:    JobProgress,
  pub summary:     Option<ImportSummary>,
  /// Set when the job failed as a whole.
  pub error:       Option<String>,
  pub started_at:  DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

struct JobEntry {
  status:   JobStatus,
  progress: ProgressReporter,
  cancel:   CancellationToken,
  done:     watch::Receiver<bool>,
}

type Jobs = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// How long finished jobs stay queryable, and how many are kept at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
  pub max_age:      chrono::Duration,
  pub max_finished: usize,
}

impl Default for Retention {
  fn default() -> Self {
    Self {
      max_age:      chrono::Duration::hours(1),
      max_finished: 256,
    }
  }
}

pub struct JobRegistry<S, T = ReqwestTransport> {
  orchestrator: Arc<ImportOrchestrator<S, T>>,
  jobs:         Jobs,
  retention:    Retention,
}

impl<S, T> Clone for JobRegistry<S, T> {
  fn clone(&self) -> Self {
    Self {
      orchestrator: Arc::clone(&self.orchestrator),
      jobs:         Arc::clone(&self.jobs),
      retention:    self.retention,
    }
  }
}

/// Drop finished jobs older than `retention.max_age`, then the oldest
/// finished jobs beyond `retention.max_finished`. Running jobs are never
/// dropped.
fn prune(jobs: &mut HashMap<JobId, JobEntry>, retention: Retention, now: DateTime<Utc>) {
  jobs.retain(|_, job| {
    job
      .status
      .finished_at
      .is_none_or(|at| now - at <= retention.max_age)
  });

  let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
    .iter()
    .filter_map(|(id, job)| job.status.finished_at.map(|at| (at, *id)))
    .collect();
  if finished.len() > retention.max_finished {
    finished.sort_unstable();
    let excess = finished.len() - retention.max_finished;
    for (_, id) in finished.into_iter().take(excess) {
      jobs.remove(&id);
    }
  }
}

impl<S, T> JobRegistry<S, T>
where
  S: GameStore + 'static,
  T: HttpTransport + Clone + 'static,
{
  pub fn new(orchestrator: Arc<ImportOrchestrator<S, T>>) -> Self {
    Self {
      orchestrator,
      jobs: Arc::new(Mutex::new(HashMap::new())),
      retention: Retention::default(),
    }
  }

  pub fn with_retention(mut self, retention: Retention) -> Self {
    self.retention = retention;
    self
  }

  pub fn orchestrator(&self) -> &Arc<ImportOrchestrator<S, T>> { &self.orchestrator }

  /// Start fetching from a remote source. Returns immediately.
  pub fn start_import(&self, request: ImportRequest) -> JobId {
    let (source, identity) = (request.source, request.identity.clone());
    self.spawn(source, identity, move |orchestrator, progress, cancel| async move {
      orchestrator.run(request, &progress, &cancel).await
    })
  }

  /// Start importing uploaded PGN text. Returns immediately.
  pub fn start_pgn_import(&self, identity: String, text: String) -> JobId {
    let who = identity.clone();
    self.spawn(SourceName::Upload, who, move |orchestrator, progress, cancel| async move {
      orchestrator
        .import_pgn(&identity, &text, &progress, &cancel)
        .await
    })
  }

  pub fn progress(&self, id: JobId) -> Result<JobProgress> {
    self
      .jobs
      .lock()
      .get(&id)
      .map(|job| job.progress.snapshot())
      .ok_or(Error::JobNotFound(id))
  }

  pub fn status(&self, id: JobId) -> Result<JobStatus> {
    let jobs = self.jobs.lock();
    let job = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
    Ok(JobStatus {
      progress: job.progress.snapshot(),
      ..job.status.clone()
    })
  }

  /// Request cancellation. The job stops at the next batch boundary, still
  /// advancing the cursor for what it wrote. Cancelling a finished job is a
  /// no-op.
  pub fn cancel(&self, id: JobId) -> Result<JobProgress> {
    let jobs = self.jobs.lock();
    let job = jobs.get(&id).ok_or(Error::JobNotFound(id))?;
    if !job.progress.snapshot().phase.is_terminal() {
      tracing::info!(job_id = %id, "cancellation requested");
      job.cancel.cancel();
    }
    Ok(job.progress.snapshot())
  }

  /// Wait for a job to reach a terminal phase.
  pub async fn wait(&self, id: JobId) -> Result<JobStatus> {
    let mut done = self
      .jobs
      .lock()
      .get(&id)
      .map(|job| job.done.clone())
      .ok_or(Error::JobNotFound(id))?;
    // The sender lives as long as the task; a dropped sender also means done.
    let _ = done.wait_for(|finished| *finished).await;
    self.status(id)
  }

  fn spawn<F, Fut>(&self, source: SourceName, identity: String, job: F) -> JobId
  where
    F: FnOnce(Arc<ImportOrchestrator<S, T>>, ProgressReporter, CancellationToken) -> Fut,
    Fut: Future<Output = Result<ImportSummary>> + Send + 'static,
  {
    let id = Uuid::new_v4();
    let progress = ProgressReporter::new();
    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(false);

    let mut jobs = self.jobs.lock();
    prune(&mut jobs, self.retention, Utc::now());
    jobs.insert(id, JobEntry {
      status: JobStatus {
        id,
        source,
        identity: identity.clone(),
        progress: progress.snapshot(),
        summary: None,
        error: None,
        started_at: Utc::now(),
        finished_at: None,
      },
      progress: progress.clone(),
      cancel: cancel.clone(),
      done: done_rx,
    });
    drop(jobs);

    let work = job(Arc::clone(&self.orchestrator), progress.clone(), cancel);
    let jobs = Arc::clone(&self.jobs);
    let orchestrator = Arc::clone(&self.orchestrator);

    tokio::spawn(async move {
      // Run the work in its own task so a panic still reaches the
      // bookkeeping below.
      let outcome = tokio::spawn(work).await;

      let (phase, summary, error) = match outcome {
        Ok(Ok(summary)) => (summary.phase(), Some(summary), None),
        Ok(Err(Error::Cancelled)) => (Phase::Cancelled, None, None),
        Ok(Err(e)) => {
          tracing::error!(job_id = %id, %source, %identity, error = %e, "import job failed");
          (Phase::Failed, None, Some(e.to_string()))
        }
        Err(e) => {
          tracing::error!(job_id = %id, %source, %identity, error = %e, "import job panicked");
          (Phase::Failed, None, Some(format!("job aborted: {e}")))
        }
      };
      progress.enter(phase, None);

      let imported_count = summary.as_ref().map_or(0, |s| s.imported_count);
      if let Some(job) = jobs.lock().get_mut(&id) {
        job.status.summary = summary;
        job.status.error = error;
        job.status.finished_at = Some(Utc::now());
      }
      orchestrator.events().emit(ImportEvent::JobFinished {
        job_id: id,
        source,
        identity,
        phase,
        imported_count,
      });
      let _ = done_tx.send(true);
    });

    tracing::info!(job_id = %id, %source, "import job started");
    id
  }
}
