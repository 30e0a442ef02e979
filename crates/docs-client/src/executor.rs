//! Workers that drive asynchronously submitted requests
//!
//! `SerialExecutor` runs jobs one after another on a dedicated thread, in
//! submission order. `TaskExecutor` hands each job to a tokio runtime.

use std::future::Future;
use std::pin::Pin;
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A submitted request, ready to run to completion.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs jobs somewhere other than the submitting thread.
///
/// Implementations should poll every job they accept to completion. A job
/// dropped before finishing reports a `TransientIo` failure to its caller.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Single worker thread with its own current-thread runtime.
pub struct SerialExecutor {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Start the worker thread.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new()
            .name("docs-client-serial".into())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = queue.recv().await {
                        job.await;
                    }
                });
                debug!("serial executor stopped");
            })?;

        Ok(Self { jobs })
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            warn!("serial worker is gone, running job detached");
            run_detached(job);
        }
    }
}

/// One tokio task per job.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    runtime: Handle,
}

impl TaskExecutor {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Executor for the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TaskExecutor {
    fn execute(&self, job: Job) {
        self.runtime.spawn(job);
    }
}

/// Last resort for a job nobody else will run.
fn run_detached(job: Job) {
    if let Ok(runtime) = Handle::try_current() {
        runtime.spawn(job);
        return;
    }
    let spawned = thread::Builder::new()
        .name("docs-client-detached".into())
        .spawn(move || match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(job),
            Err(e) => warn!(error = %e, "could not start runtime for detached job"),
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not spawn thread for detached job");
    }
}
