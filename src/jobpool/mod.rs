//! Bounded concurrent job pool
//!
//! Runs a fixed list of independent jobs with at most `concurrency` of them in
//! flight at any moment, then exposes the outcome of every job. The inventory
//! layer builds one job per region and hands the list to a pool.
//!
//! # Example
//!
//! ```ignore
//! use gcpscan::jobpool::{Job, JobPool};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let jobs = ["us-central1", "europe-west1"]
//!         .into_iter()
//!         .map(|region| Job::new(move |_cancel| async move { Ok(region.len()) }))
//!         .collect();
//!
//!     let mut pool = JobPool::new(jobs, 5);
//!     pool.run().await;
//!
//!     let lengths = pool.into_results()?;
//!     assert_eq!(lengths, vec![11, 12]);
//!     Ok(())
//! }
//! ```

mod error;

pub use error::{JobError, JobFailure, PoolError};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Fan-out width used when nothing else is configured
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Deferred work: receives a cancellation token, yields a result or an error
pub type JobFn<T> =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Lifecycle of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not yet claimed by a worker
    Pending,
    /// Claimed, function handed to a worker
    Running,
    /// Function returned a result
    Succeeded,
    /// Function returned an error, panicked, or was cancelled
    Failed,
}

/// A unit of deferred work plus storage for its outcome.
///
/// The outcome is written exactly once, by [`JobPool::run`].
pub struct Job<T> {
    func: Option<JobFn<T>>,
    result: Option<T>,
    err: Option<JobError>,
}

impl<T: Send + 'static> Job<T> {
    /// Wrap an async function as a job
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            func: Some(Box::new(move |cancel| f(cancel).boxed())),
            result: None,
            err: None,
        }
    }

    /// A job whose only purpose is to surface `err` through the pool.
    ///
    /// Used when an upstream step failed before any real job could be built.
    pub fn failed(err: anyhow::Error) -> Self {
        Self::new(move |_| async move { Err(err) })
    }
}

impl<T> Job<T> {
    pub fn state(&self) -> JobState {
        match (&self.result, &self.err, &self.func) {
            (Some(_), _, _) => JobState::Succeeded,
            (None, Some(_), _) => JobState::Failed,
            (None, None, Some(_)) => JobState::Pending,
            (None, None, None) => JobState::Running,
        }
    }

    /// The value produced by the job, if it succeeded
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// The error recorded for the job, if it failed
    pub fn error(&self) -> Option<&JobError> {
        self.err.as_ref()
    }

    fn record(&mut self, outcome: Result<T, JobError>) {
        match outcome {
            Ok(value) => self.result = Some(value),
            Err(err) => self.err = Some(err),
        }
    }

    fn into_outcome(self) -> Result<T, JobError> {
        match (self.result, self.err) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(JobError::NotRun),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("pending", &self.func.is_some())
            .field("result", &self.result)
            .field("err", &self.err)
            .finish()
    }
}

/// Executes a list of jobs with bounded parallelism.
pub struct JobPool<T> {
    jobs: Vec<Job<T>>,
    concurrency: usize,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

/// Shared between workers for the duration of one `run()`
struct RunState<T> {
    slots: Vec<Mutex<Option<JobFn<T>>>>,
    cursor: AtomicUsize,
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl<T> RunState<T> {
    /// Claim the next job. Each index is handed out once.
    fn claim(&self) -> Option<(usize, Option<JobFn<T>>)> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        let slot = self.slots.get(index)?;
        let func = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Some((index, func))
    }

    fn stop_reason(&self) -> Option<JobError> {
        if let Some((deadline, limit)) = self.deadline {
            if Instant::now() >= deadline {
                return Some(JobError::TimedOut(limit));
            }
        }
        self.cancel.is_cancelled().then_some(JobError::Cancelled)
    }
}

impl<T: Send + 'static> JobPool<T> {
    /// Create a pool. `concurrency` below 1 is treated as 1.
    pub fn new(jobs: Vec<Job<T>>, concurrency: usize) -> Self {
        Self {
            jobs,
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    /// Abort the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Abort the run once `timeout` has elapsed since `run()` started
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn jobs(&self) -> &[Job<T>] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every pending job and wait until all of them have an outcome.
    ///
    /// No retries happen here. Jobs that already ran are left untouched.
    pub async fn run(&mut self) {
        let pending = self.jobs.iter().filter(|j| j.func.is_some()).count();
        if pending == 0 {
            return;
        }

        let run_id = Uuid::new_v4();
        let workers = self.concurrency.min(pending);
        tracing::debug!(%run_id, jobs = pending, workers, "job pool started");

        let state = Arc::new(RunState {
            slots: self
                .jobs
                .iter_mut()
                .map(|job| Mutex::new(job.func.take()))
                .collect(),
            cursor: AtomicUsize::new(0),
            cancel: self.cancel.child_token(),
            deadline: self.timeout.map(|t| (Instant::now() + t, t)),
        });

        let handles: Vec<_> = (0..workers)
            .map(|_| tokio::spawn(worker(Arc::clone(&state))))
            .collect();

        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        self.jobs[index].record(outcome);
                    }
                }
                Err(err) => tracing::error!(%run_id, "job pool worker aborted: {}", err),
            }
        }

        // A worker that died takes its recorded outcomes with it
        for job in &mut self.jobs {
            if job.state() == JobState::Running {
                job.err = Some(JobError::Panicked("worker terminated".to_string()));
            }
        }

        let failed = self.jobs.iter().filter(|j| j.err.is_some()).count();
        tracing::debug!(%run_id, failed, "job pool finished");
    }

    /// True if at least one job failed. Only meaningful after `run()`.
    pub fn has_errors(&self) -> bool {
        self.jobs.iter().any(|job| job.err.is_some())
    }

    /// All job failures combined, in job order
    pub fn errors(&self) -> Option<PoolError> {
        let failures: Vec<JobFailure> = self
            .jobs
            .iter()
            .enumerate()
            .filter_map(|(index, job)| {
                job.err.as_ref().map(|err| JobFailure {
                    index,
                    message: format!("{:#}", err),
                })
            })
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(PoolError { failures })
        }
    }

    /// Every result in job order, or the combined error if any job failed
    pub fn into_results(self) -> Result<Vec<T>, PoolError> {
        match self.into_partial() {
            (results, None) => Ok(results),
            (_, Some(err)) => Err(err),
        }
    }

    /// Results of the jobs that succeeded, alongside the combined error of the rest
    pub fn into_partial(self) -> (Vec<T>, Option<PoolError>) {
        let mut results = Vec::with_capacity(self.jobs.len());
        let mut failures = Vec::new();

        for (index, job) in self.jobs.into_iter().enumerate() {
            match job.into_outcome() {
                Ok(value) => results.push(value),
                Err(err) => failures.push(JobFailure {
                    index,
                    message: format!("{:#}", err),
                }),
            }
        }

        let err = (!failures.is_empty()).then_some(PoolError { failures });
        (results, err)
    }
}

impl<T> fmt::Debug for JobPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPool")
            .field("jobs", &self.jobs.len())
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn worker<T: Send + 'static>(state: Arc<RunState<T>>) -> Vec<(usize, Result<T, JobError>)> {
    let mut outcomes = Vec::new();

    while let Some((index, func)) = state.claim() {
        let Some(func) = func else {
            continue;
        };

        let outcome = match state.stop_reason() {
            Some(reason) => Err(reason),
            None => execute(func, &state).await,
        };
        outcomes.push((index, outcome));
    }

    outcomes
}

async fn execute<T>(func: JobFn<T>, state: &RunState<T>) -> Result<T, JobError> {
    // The call itself sits inside the guarded future so a panic raised
    // before the job yields its future is caught too
    let token = state.cancel.child_token();
    let run = AssertUnwindSafe(async move { func(token).await }).catch_unwind();

    let deadline = async {
        match state.deadline {
            Some((at, limit)) => {
                tokio::time::sleep_until(at).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = state.cancel.cancelled() => Err(JobError::Cancelled),
        limit = deadline => Err(JobError::TimedOut(limit)),
        outcome = run => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(JobError::Failed(err)),
            Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::errors::{is_soft_skippable, ApiError};
    use std::sync::atomic::AtomicBool;

    fn counting_job(
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        value: usize,
    ) -> Job<usize> {
        Job::new(move |_| async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    #[tokio::test]
    async fn test_zero_jobs() {
        let mut pool: JobPool<()> = JobPool::new(Vec::new(), 5);
        pool.run().await;

        assert!(!pool.has_errors());
        assert!(pool.errors().is_none());
        assert!(pool.into_results().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..20)
            .map(|i| counting_job(active.clone(), peak.clone(), i))
            .collect();
        let mut pool = JobPool::new(jobs, 3);
        pool.run().await;

        assert!(!pool.has_errors());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(pool.into_results().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fewer_jobs_than_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..2)
            .map(|i| counting_job(active.clone(), peak.clone(), i))
            .collect();
        let mut pool = JobPool::new(jobs, 10);
        pool.run().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let pool: JobPool<()> = JobPool::new(Vec::new(), 0);
        assert_eq!(pool.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_aggregated() {
        let jobs = vec![
            Job::new(|_| async { Ok(1) }),
            Job::new(|_| async { Err(anyhow::anyhow!("boom")) }),
            Job::new(|_| async { Ok(3) }),
        ];
        let mut pool = JobPool::new(jobs, 5);
        pool.run().await;

        assert!(pool.has_errors());
        assert_eq!(pool.jobs()[0].state(), JobState::Succeeded);
        assert_eq!(pool.jobs()[1].state(), JobState::Failed);
        assert!(pool.jobs()[1].result().is_none());

        let err = pool.errors().unwrap();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].index, 1);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_partial_results_kept() {
        let jobs = vec![
            Job::new(|_| async { Ok("a") }),
            Job::new(|_| async { Err(anyhow::anyhow!("region exploded")) }),
            Job::new(|_| async { Ok("c") }),
        ];
        let mut pool = JobPool::new(jobs, 2);
        pool.run().await;

        let (results, err) = pool.into_partial();
        assert_eq!(results, vec!["a", "c"]);
        assert!(err.unwrap().to_string().contains("region exploded"));
    }

    #[tokio::test]
    async fn test_failed_sentinel_runs_like_any_job() {
        let mut pool: JobPool<Vec<String>> =
            JobPool::new(vec![Job::failed(anyhow::anyhow!("cannot list regions"))], 5);
        assert_eq!(pool.jobs()[0].state(), JobState::Pending);

        pool.run().await;

        assert!(pool.has_errors());
        assert!(pool
            .errors()
            .unwrap()
            .to_string()
            .contains("cannot list regions"));
    }

    #[tokio::test]
    async fn test_soft_skipped_error_is_success() {
        let denied = || -> anyhow::Error {
            ApiError {
                status: 403,
                code: Some("PERMISSION_DENIED".to_string()),
                reason: None,
                message: "Location europe-north2 is not enabled".to_string(),
                url: "https://compute.googleapis.com".to_string(),
            }
            .into()
        };

        let jobs = (0..3)
            .map(|i| {
                Job::new(move |_| async move {
                    let partial = vec![i];
                    if i == 1 {
                        let err = denied();
                        if is_soft_skippable(&err) {
                            return Ok(partial);
                        }
                        return Err(err);
                    }
                    Ok(partial)
                })
            })
            .collect();

        let mut pool = JobPool::new(jobs, 5);
        pool.run().await;

        assert!(!pool.has_errors());
        assert!(pool.jobs()[1].error().is_none());
        assert_eq!(pool.jobs()[1].result(), Some(&vec![1]));
    }

    #[tokio::test]
    async fn test_each_job_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let jobs = (0..50)
            .map(|_| {
                let calls = calls.clone();
                Job::new(move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        let mut pool = JobPool::new(jobs, 7);
        pool.run().await;
        pool.run().await;

        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let token = CancellationToken::new();
        token.cancel();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let jobs = vec![Job::new(move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })];

        let mut pool = JobPool::new(jobs, 1).with_cancellation(token);
        pool.run().await;

        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(pool.jobs()[0].error(), Some(JobError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let token = CancellationToken::new();
        let jobs = vec![Job::new(|_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })];
        let mut pool = JobPool::new(jobs, 1).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), pool.run())
            .await
            .expect("run should return after cancellation");
        canceller.await.unwrap();

        assert!(matches!(pool.jobs()[0].error(), Some(JobError::Cancelled)));
    }

    #[tokio::test]
    async fn test_job_sees_cancellation_token() {
        let token = CancellationToken::new();
        token.cancel();
        let jobs = vec![Job::new(|cancel: CancellationToken| async move {
            Ok(cancel.is_cancelled())
        })];

        // Not cancelled through the pool, so the job runs with a live token
        let mut pool = JobPool::new(jobs, 1);
        pool.run().await;
        assert_eq!(pool.jobs()[0].result(), Some(&false));
    }

    #[tokio::test]
    async fn test_timeout() {
        let jobs = vec![
            Job::new(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            }),
            Job::new(|_| async { Ok(2) }),
        ];
        let mut pool = JobPool::new(jobs, 1).with_timeout(Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(5), pool.run())
            .await
            .expect("run should return after the deadline");

        assert!(matches!(
            pool.jobs()[0].error(),
            Some(JobError::TimedOut(_))
        ));
        // Second job was never claimed before the deadline
        assert!(matches!(
            pool.jobs()[1].error(),
            Some(JobError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn test_panic_is_recorded() {
        let jobs: Vec<Job<u8>> = vec![
            Job::new(|_| async {
                if true {
                    panic!("bad mapping");
                }
                Ok(0)
            }),
            Job::new(|_| async { Ok(1) }),
        ];
        let mut pool = JobPool::new(jobs, 2);
        pool.run().await;

        assert!(matches!(pool.jobs()[0].error(), Some(JobError::Panicked(msg)) if msg == "bad mapping"));
        assert_eq!(pool.jobs()[1].result(), Some(&1));
    }

    #[tokio::test]
    async fn test_panic_before_future_keeps_other_outcomes() {
        let jobs: Vec<Job<u8>> = vec![
            Job::new(|_| async { Ok(1) }),
            Job::new(|_| -> std::future::Ready<anyhow::Result<u8>> { panic!("bad mapping") }),
            Job::new(|_| async { Ok(3) }),
        ];
        let mut pool = JobPool::new(jobs, 1);
        pool.run().await;

        assert_eq!(pool.jobs()[0].result(), Some(&1));
        assert!(matches!(pool.jobs()[1].error(), Some(JobError::Panicked(msg)) if msg == "bad mapping"));
        assert_eq!(pool.jobs()[2].result(), Some(&3));
        assert_eq!(pool.errors().unwrap().failures().len(), 1);
    }

    #[test]
    fn test_unrun_jobs_fail_on_collect() {
        let pool = JobPool::new(vec![Job::new(|_| async { Ok(()) })], 1);
        let err = pool.into_results().unwrap_err();
        assert!(err.to_string().contains("never ran"));
    }
}
