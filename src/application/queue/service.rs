use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{OutputFormat, Parameters, RenderOptions, RenderResult};
use crate::engine::{EngineError, RenderEngine, wait_until_idle};
use crate::util::lock::mutex_lock;
use crate::util::{ListenerList, SubscriptionId};

use super::error::QueueError;
use super::events::{ProcessSummary, QueueEvent};
use super::job::{JobState, ProjectSource, QueueStats, RenderJob};
use super::snapshot::QueueSnapshot;

const SOURCE: &str = "application::queue";
const METRIC_QUEUE_JOB_TOTAL: &str = "tessera_queue_job_total";

const DEFAULT_MAX_QUEUE_SIZE: usize = 20;
const DEFAULT_BUSY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_size: usize,
    /// How often a job waiting for the engine re-checks `is_busy`.
    pub busy_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_QUEUE_SIZE,
            busy_poll_interval: DEFAULT_BUSY_POLL_INTERVAL,
        }
    }
}

impl From<&crate::config::Settings> for QueueConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            max_size: settings.queue.max_size,
            busy_poll_interval: settings.queue.busy_poll_interval,
        }
    }
}

#[derive(Default)]
struct QueueState {
    jobs: Vec<RenderJob>,
    source: Option<ProjectSource>,
    current_job: Option<String>,
    /// Jobs ever admitted; default names never repeat after removals.
    admitted: u64,
}

impl QueueState {
    fn job_mut(&mut self, id: &str) -> Option<&mut RenderJob> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    fn admit(&mut self, job: RenderJob) {
        self.admitted += 1;
        self.jobs.push(job);
    }

    fn next_default_name(&self) -> String {
        format!("Job {}", self.admitted + 1)
    }
}

struct QueueInner {
    engine: Arc<dyn RenderEngine>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    processing: AtomicBool,
    stop_requested: AtomicBool,
    listeners: ListenerList<QueueEvent>,
}

/// Resets the processing flag however `process_queue` exits.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Ordered, capacity-bounded list of render jobs drained one at a time.
#[derive(Clone)]
pub struct BatchRenderQueue {
    inner: Arc<QueueInner>,
}

impl BatchRenderQueue {
    pub fn new(engine: Arc<dyn RenderEngine>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                engine,
                config,
                state: Mutex::new(QueueState::default()),
                processing: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                listeners: ListenerList::new(SOURCE),
            }),
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, QueueState> {
        mutex_lock(&self.inner.state, SOURCE, op)
    }

    fn emit(&self, event: QueueEvent) {
        self.inner.listeners.emit(&event);
    }

    pub fn set_project_source(&self, source: ProjectSource) {
        self.lock("set_project_source").source = Some(source);
    }

    pub fn add_job(
        &self,
        name: Option<String>,
        parameters: Parameters,
        output_format: OutputFormat,
    ) -> Result<String, QueueError> {
        let mut state = self.lock("add_job");
        let max = self.inner.config.max_size;
        if state.jobs.len() >= max {
            return Err(QueueError::CapacityExceeded { max });
        }

        let id = new_job_id();
        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| state.next_default_name());
        state.admit(RenderJob::new(id.clone(), name, parameters, output_format));
        drop(state);

        debug!(job_id = %id, "Job added");
        self.emit(QueueEvent::Added { job_id: id.clone() });
        Ok(id)
    }

    /// Remove a job. Unknown ids are ignored; a rendering job cannot be removed.
    pub fn remove_job(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.lock("remove_job");
        let Some(index) = state.jobs.iter().position(|job| job.id == id) else {
            return Ok(());
        };
        if state.jobs[index].state == JobState::Rendering {
            return Err(QueueError::JobRendering { id: id.to_string() });
        }
        state.jobs.remove(index);
        drop(state);

        debug!(job_id = %id, "Job removed");
        self.emit(QueueEvent::Removed {
            job_id: id.to_string(),
        });
        Ok(())
    }

    /// Cancel a queued job. Returns false when the job is unknown or not queued.
    pub fn cancel_job(&self, id: &str) -> bool {
        let mut state = self.lock("cancel_job");
        let Some(job) = state.job_mut(id) else {
            return false;
        };
        if job.state != JobState::Queued {
            return false;
        }
        job.state = JobState::Cancelled;
        drop(state);

        debug!(job_id = %id, "Job cancelled");
        self.emit(QueueEvent::Updated {
            job_id: id.to_string(),
            state: JobState::Cancelled,
        });
        true
    }

    pub fn update_job_parameters(&self, id: &str, parameters: Parameters) -> Result<(), QueueError> {
        self.modify_job(id, "update_job_parameters", |job| job.parameters = parameters)
    }

    pub fn update_job_format(&self, id: &str, output_format: OutputFormat) -> Result<(), QueueError> {
        self.modify_job(id, "update_job_format", |job| job.output_format = output_format)
    }

    /// Apply an edit that invalidates the job's result and requeue it.
    fn modify_job<F>(&self, id: &str, op: &'static str, apply: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut RenderJob),
    {
        let mut state = self.lock(op);
        let job = state.job_mut(id).ok_or_else(|| QueueError::JobNotFound {
            id: id.to_string(),
        })?;
        if job.state == JobState::Rendering {
            return Err(QueueError::JobRendering { id: id.to_string() });
        }
        apply(job);
        job.requeue();
        drop(state);

        self.emit(QueueEvent::Updated {
            job_id: id.to_string(),
            state: JobState::Queued,
        });
        Ok(())
    }

    pub fn rename_job(&self, id: &str, name: impl Into<String>) -> Result<(), QueueError> {
        let mut state = self.lock("rename_job");
        let job = state.job_mut(id).ok_or_else(|| QueueError::JobNotFound {
            id: id.to_string(),
        })?;
        job.name = name.into();
        let job_state = job.state;
        drop(state);

        self.emit(QueueEvent::Updated {
            job_id: id.to_string(),
            state: job_state,
        });
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Option<RenderJob> {
        self.lock("get_job")
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }

    pub fn jobs(&self) -> Vec<RenderJob> {
        self.lock("jobs").jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.lock("len").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::collect(&self.lock("stats").jobs)
    }

    /// Id of the job currently rendering.
    pub fn current_job(&self) -> Option<String> {
        self.lock("current_job").current_job.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Drop every job. Refused while the queue is processing or a job renders.
    pub fn clear_queue(&self) -> Result<usize, QueueError> {
        if self.is_processing() {
            return Err(QueueError::AlreadyProcessing);
        }
        let mut state = self.lock("clear_queue");
        if let Some(job) = state.jobs.iter().find(|job| job.state == JobState::Rendering) {
            return Err(QueueError::JobRendering { id: job.id.clone() });
        }
        let removed = state.jobs.len();
        state.jobs.clear();
        drop(state);

        info!(removed, "Render queue cleared");
        self.emit(QueueEvent::Cleared { removed });
        Ok(removed)
    }

    /// Drop finished jobs, keeping everything still queued, failed or cancelled.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.lock("clear_completed");
        let before = state.jobs.len();
        state.jobs.retain(|job| job.state != JobState::Complete);
        let removed = before - state.jobs.len();
        drop(state);

        if removed > 0 {
            self.emit(QueueEvent::Cleared { removed });
        }
        removed
    }

    /// Render one job at full quality, waiting for the engine to go idle first.
    pub async fn render_job(&self, id: &str) -> Result<RenderResult, QueueError> {
        let (source, parameters, output_format) = {
            let mut state = self.lock("render_job");
            let source = state.source.clone().ok_or(QueueError::NoContent)?;
            let job = state.job_mut(id).ok_or_else(|| QueueError::JobNotFound {
                id: id.to_string(),
            })?;
            if job.state == JobState::Rendering {
                return Err(QueueError::JobRendering { id: id.to_string() });
            }
            job.requeue();
            job.state = JobState::Rendering;
            let snapshot = (source, job.parameters.clone(), job.output_format);
            state.current_job = Some(id.to_string());
            snapshot
        };
        self.emit(QueueEvent::Updated {
            job_id: id.to_string(),
            state: JobState::Rendering,
        });

        wait_until_idle(self.inner.engine.as_ref(), self.inner.config.busy_poll_interval).await;

        info!(job_id = %id, format = %output_format, "Rendering job");
        let options = RenderOptions::full(output_format)
            .with_project(source.project)
            .with_libraries(source.libraries);
        let started = Instant::now();
        let outcome = self
            .inner
            .engine
            .render(source.scad_source, parameters, options)
            .await;
        let render_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let final_state = {
            let mut state = self.lock("render_job.settle");
            if state.current_job.as_deref() == Some(id) {
                state.current_job = None;
            }
            let final_state = match &outcome {
                Ok(_) => JobState::Complete,
                Err(EngineError::Cancelled) => JobState::Cancelled,
                Err(_) => JobState::Error,
            };
            if let Some(job) = state.job_mut(id) {
                job.state = final_state;
                job.render_time_ms = Some(render_time_ms);
                match &outcome {
                    Ok(result) => job.result = Some(result.clone()),
                    Err(err) => job.error = Some(err.to_string()),
                }
            }
            final_state
        };

        counter!(METRIC_QUEUE_JOB_TOTAL, "outcome" => final_state.as_str()).increment(1);
        match &outcome {
            Ok(_) => info!(job_id = %id, render_time_ms, "Job complete"),
            Err(err) => warn!(job_id = %id, render_time_ms, error = %err, "Job failed"),
        }
        self.emit(QueueEvent::Updated {
            job_id: id.to_string(),
            state: final_state,
        });

        outcome.map_err(QueueError::from)
    }

    /// Render every queued job in order. One job's failure never aborts the run.
    pub async fn process_queue(&self) -> Result<ProcessSummary, QueueError> {
        if self.inner.processing.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyProcessing);
        }
        let _guard = ProcessingGuard {
            flag: &self.inner.processing,
        };
        self.inner.stop_requested.store(false, Ordering::Release);

        let (job_ids, queued) = {
            let state = self.lock("process_queue");
            if state.source.is_none() {
                return Err(QueueError::NoContent);
            }
            let ids: Vec<String> = state.jobs.iter().map(|job| job.id.clone()).collect();
            let queued = state
                .jobs
                .iter()
                .filter(|job| job.state == JobState::Queued)
                .count();
            (ids, queued)
        };

        info!(queued, "Processing render queue");
        self.emit(QueueEvent::ProcessingStarted { queued });

        let mut summary = ProcessSummary::default();
        for job_id in job_ids {
            if self.inner.stop_requested.load(Ordering::Acquire) {
                summary.stopped = true;
                break;
            }

            let job_state = self
                .lock("process_queue.next")
                .jobs
                .iter()
                .find(|job| job.id == job_id)
                .map(|job| job.state);

            match job_state {
                Some(JobState::Queued) => match self.render_job(&job_id).await {
                    Ok(_) => summary.completed += 1,
                    Err(QueueError::Engine(EngineError::Cancelled)) => summary.skipped += 1,
                    Err(QueueError::JobNotFound { .. } | QueueError::JobRendering { .. }) => {}
                    Err(_) => summary.failed += 1,
                },
                Some(JobState::Cancelled) => summary.skipped += 1,
                _ => {}
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            stopped = summary.stopped,
            "Render queue processed"
        );
        let event = if summary.stopped {
            QueueEvent::ProcessingStopped(summary)
        } else {
            QueueEvent::ProcessingComplete(summary)
        };
        self.emit(event);
        Ok(summary)
    }

    /// Ask a running `process_queue` to stop before its next job. Returns
    /// false when nothing is processing.
    pub fn stop_processing(&self) -> bool {
        if !self.is_processing() {
            return false;
        }
        self.inner.stop_requested.store(true, Ordering::Release);
        info!("Render queue stop requested");
        true
    }

    pub fn export_queue(&self) -> QueueSnapshot {
        QueueSnapshot::capture(&self.lock("export_queue").jobs)
    }

    /// Import exported queue data, appending its still-queued jobs.
    pub fn import_queue(&self, data: &str) -> Result<usize, QueueError> {
        self.import_snapshot(QueueSnapshot::parse(data)?)
    }

    /// Append the queued jobs of `snapshot`. Jobs saved in any other state are
    /// skipped. Nothing is imported when the result would exceed capacity.
    pub fn import_snapshot(&self, snapshot: QueueSnapshot) -> Result<usize, QueueError> {
        let total = snapshot.jobs.len();
        let admissible: Vec<_> = snapshot
            .jobs
            .into_iter()
            .filter(|job| job.state == JobState::Queued)
            .collect();

        let mut state = self.lock("import_snapshot");
        let max = self.inner.config.max_size;
        if state.jobs.len() + admissible.len() > max {
            return Err(QueueError::CapacityExceeded { max });
        }

        let mut added = Vec::with_capacity(admissible.len());
        for job in admissible {
            let id = if job.id.is_empty() || state.jobs.iter().any(|existing| existing.id == job.id) {
                new_job_id()
            } else {
                job.id
            };
            let name = if job.name.trim().is_empty() {
                state.next_default_name()
            } else {
                job.name
            };
            state.admit(RenderJob::new(id.clone(), name, job.parameters, job.output_format));
            added.push(id);
        }
        drop(state);

        info!(
            imported = added.len(),
            skipped = total - added.len(),
            "Render queue imported"
        );
        for job_id in &added {
            self.emit(QueueEvent::Added {
                job_id: job_id.clone(),
            });
        }
        Ok(added.len())
    }

    /// Listener panics are logged and do not stop delivery to the others.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }
}

fn new_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}
