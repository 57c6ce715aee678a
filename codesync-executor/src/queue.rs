use codesync_protocol::common::{
    ExecutionRequest, ExecutionResult, JobId, JobState, JobStatus, QueueStats,
};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{format_err, Result};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task;
use tracing::{debug, warn};

type Executor = Box<dyn FnOnce() -> BoxFuture<'static, Result<ExecutionResult>> + Send>;
type OnComplete = Box<dyn FnOnce(&ExecutionResult) + Send>;
type OnError = Box<dyn FnOnce(&anyhow::Error) + Send>;

/// A unit of work waiting for an execution slot.
pub struct Job {
    request: ExecutionRequest,
    executor: Executor,
    on_complete: Option<OnComplete>,
    on_error: Option<OnError>,
    reply: Option<oneshot::Sender<Result<ExecutionResult>>>,
}

impl Job {
    pub fn new<F, Fut>(request: ExecutionRequest, executor: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
    {
        Self {
            request,
            executor: Box::new(move || executor().boxed()),
            on_complete: None,
            on_error: None,
            reply: None,
        }
    }

    pub fn on_complete(mut self, f: impl FnOnce(&ExecutionResult) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&anyhow::Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

struct ActiveJob {
    language: String,
    on_complete: Option<OnComplete>,
    on_error: Option<OnError>,
    reply: Option<oneshot::Sender<Result<ExecutionResult>>>,
}

struct State {
    counter: JobId,
    waiting: VecDeque<(JobId, Job)>,
    active: HashMap<JobId, ActiveJob>,
}

/// FIFO admission control bounding how many jobs run at once.
pub struct AdmissionQueue {
    max_concurrent: usize,
    state: Mutex<State>,
}

impl AdmissionQueue {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(State {
                counter: 0,
                waiting: VecDeque::new(),
                active: HashMap::new(),
            }),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Appends the job and returns its id without waiting for it to start.
    pub async fn enqueue(self: &Arc<Self>, job: Job) -> JobId {
        let mut state = self.state.lock().await;
        state.counter += 1;
        let id = state.counter;
        debug!(job_id = id, language = %job.request.language, "job queued");
        state.waiting.push_back((id, job));
        self.advance(&mut state);
        id
    }

    /// Enqueues a job and waits for its outcome.
    pub async fn submit<F, Fut>(
        self: &Arc<Self>,
        request: ExecutionRequest,
        executor: F,
    ) -> Result<ExecutionResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut job = Job::new(request, executor);
        job.reply = Some(tx);
        self.enqueue(job).await;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(format_err!("job was dropped before completion")),
        }
    }

    pub async fn job_status(&self, id: JobId) -> Option<JobStatus> {
        let state = self.state.lock().await;
        let status = if state.active.contains_key(&id) {
            JobState::Running
        } else if state.waiting.iter().any(|&(queued, _)| queued == id) {
            JobState::Queued
        } else {
            return None;
        };
        Some(JobStatus { id, status })
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            queued: state.waiting.len(),
            active: state.active.len(),
            max_concurrent: self.max_concurrent,
        }
    }

    /// Starts waiting jobs while there are free slots. Runs under the state lock.
    fn advance(self: &Arc<Self>, state: &mut State) {
        while state.active.len() < self.max_concurrent {
            let (id, job) = match state.waiting.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            let Job {
                request,
                executor,
                on_complete,
                on_error,
                reply,
            } = job;

            state.active.insert(
                id,
                ActiveJob {
                    language: request.language,
                    on_complete,
                    on_error,
                    reply,
                },
            );
            debug!(job_id = id, state = ?JobState::Running, "job started");

            let future = match panic::catch_unwind(AssertUnwindSafe(executor)) {
                Ok(future) => future,
                Err(payload) => {
                    let err = panic_error(payload);
                    async move { Err(err) }.boxed()
                }
            };

            let queue = Arc::clone(self);
            task::spawn(async move {
                let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(panic_error(payload)),
                };
                queue.finish(id, outcome).await;
            });
        }
    }

    /// Records the outcome, notifies the job's callbacks and reply, then frees its slot.
    async fn finish(self: &Arc<Self>, id: JobId, outcome: Result<ExecutionResult>) {
        let job = self.state.lock().await.active.remove(&id);

        match job {
            Some(job) => Self::notify(id, job, outcome),
            None => warn!(job_id = id, "finished job is not active"),
        }

        let mut state = self.state.lock().await;
        self.advance(&mut state);
    }

    fn notify(id: JobId, job: ActiveJob, outcome: Result<ExecutionResult>) {
        let callback = match outcome {
            Ok(ref result) => {
                debug!(job_id = id, language = %job.language, state = ?JobState::Completed, status = %result.status, "job finished");
                job.on_complete.map(|f| panic::catch_unwind(AssertUnwindSafe(|| f(result))))
            }
            Err(ref err) => {
                warn!(job_id = id, language = %job.language, state = ?JobState::Failed, err = %format!("{:#}", err), "job failed");
                job.on_error.map(|f| panic::catch_unwind(AssertUnwindSafe(|| f(err))))
            }
        };
        if let Some(Err(payload)) = callback {
            warn!(job_id = id, err = %panic_error(payload), "job callback panicked");
        }

        if let Some(tx) = job.reply {
            let _ = tx.send(outcome);
        }
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    };
    format_err!("job panicked: {}", msg)
}
