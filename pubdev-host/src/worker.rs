//! Per-workspace sandbox worker.
//!
//! A sandbox is bound to the thread that created it, so each workspace gets a
//! dedicated OS thread that owns its runtime and executes jobs one at a time.
//! Async callers talk to it through a [`SandboxHandle`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pubdev_core::{ScriptPath, WorkspaceId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{Bridge, HostConfig, HostError, ModuleInfo, Sandbox, ScriptBackend};

/// Extra wait beyond the script budget before the caller gives up on a
/// worker that failed to interrupt itself.
const REPLY_GRACE: Duration = Duration::from_millis(250);

type Reply<T> = oneshot::Sender<Result<T, HostError>>;

/// Reply channel of a queued job, plus the signal that the worker picked it
/// up. The caller's budget runs from that signal, not from submission.
struct Ticket<T> {
    started: oneshot::Sender<()>,
    reply: Reply<T>,
}

impl<T> Ticket<T> {
    /// The reply channel, or `None` if the caller already gave up.
    fn accept(self) -> Option<Reply<T>> {
        if self.reply.is_closed() {
            return None;
        }
        let _ = self.started.send(());
        Some(self.reply)
    }
}

enum Job {
    Load { path: ScriptPath, source: String, ticket: Ticket<ModuleInfo> },
    Call { path: ScriptPath, function: String, args: Vec<Value>, ticket: Ticket<Value> },
    Unload { path: ScriptPath },
    SharedState { ticket: Ticket<Value> },
}

/// Handle to a running workspace sandbox.
///
/// The worker thread exits once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    workspace: WorkspaceId,
    jobs: mpsc::UnboundedSender<Job>,
    budget: Duration,
    created_at: DateTime<Utc>,
}

impl SandboxHandle {
    /// Start a worker thread and create the workspace's sandbox on it.
    ///
    /// # Errors
    /// Returns [`HostError::Runtime`] if the thread cannot be spawned or the
    /// backend fails to create the sandbox.
    pub async fn spawn(
        workspace: WorkspaceId,
        backend: Arc<dyn ScriptBackend>,
        bridge: Bridge,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        let (jobs, queue) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_workspace = workspace.clone();
        let budget = config.handler_timeout;
        let engine = backend.name();

        std::thread::Builder::new()
            .name(format!("sandbox-{workspace}"))
            .spawn(move || {
                let sandbox = match backend.create_sandbox(&thread_workspace, bridge, &config) {
                    Ok(sandbox) => {
                        let _ = ready_tx.send(Ok(()));
                        sandbox
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run(&thread_workspace, sandbox, queue, config.handler_timeout);
            })
            .map_err(|e| HostError::Runtime(format!("cannot start sandbox thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| HostError::WorkerGone(workspace.to_string()))??;
        tracing::info!(workspace = %workspace, engine, "sandbox started");
        Ok(Self { workspace, jobs, budget, created_at: Utc::now() })
    }

    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Evaluate a module's source in the sandbox.
    ///
    /// # Errors
    /// See [`Sandbox::load`]; also [`HostError::WorkerGone`] and
    /// [`HostError::Timeout`] when the worker does not answer in time.
    pub async fn load(&self, path: &ScriptPath, source: String) -> Result<ModuleInfo, HostError> {
        let job_path = path.clone();
        self.request(path, |ticket| Job::Load { path: job_path, source, ticket }).await
    }

    /// Invoke an exported function.
    ///
    /// # Errors
    /// See [`Sandbox::call`]; also [`HostError::WorkerGone`] and
    /// [`HostError::Timeout`] when the worker does not answer in time.
    pub async fn call(&self, path: &ScriptPath, function: &str, args: Vec<Value>) -> Result<Value, HostError> {
        let job_path = path.clone();
        let function = function.to_owned();
        self.request(path, |ticket| Job::Call { path: job_path, function, args, ticket }).await
    }

    /// Forget a module's exports. Fire and forget.
    pub fn unload(&self, path: &ScriptPath) {
        if self.submit(Job::Unload { path: path.clone() }).is_err() {
            tracing::debug!(workspace = %self.workspace, path = %path, "sandbox gone before unload");
        }
    }

    /// Snapshot of the workspace's shared state object.
    ///
    /// # Errors
    /// [`HostError::WorkerGone`], [`HostError::Timeout`] or a serialisation
    /// failure inside the sandbox.
    pub async fn shared_state(&self) -> Result<Value, HostError> {
        self.request(&ScriptPath::root(), |ticket| Job::SharedState { ticket }).await
    }

    fn submit(&self, job: Job) -> Result<(), HostError> {
        self.jobs
            .send(job)
            .map_err(|_| HostError::WorkerGone(self.workspace.to_string()))
    }

    /// Queue a job and wait for its result. Waiting in the queue is not
    /// charged to the budget; a caller that stops waiting before the job
    /// starts cancels it.
    async fn request<T>(&self, path: &ScriptPath, job: impl FnOnce(Ticket<T>) -> Job) -> Result<T, HostError> {
        let (started, started_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        self.submit(job(Ticket { started, reply }))?;

        started_rx
            .await
            .map_err(|_| HostError::WorkerGone(self.workspace.to_string()))?;
        match tokio::time::timeout(self.budget + REPLY_GRACE, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::WorkerGone(self.workspace.to_string())),
            Err(_) => {
                tracing::warn!(workspace = %self.workspace, path = %path, "sandbox did not answer in time");
                Err(HostError::Timeout { path: path.to_string(), budget_ms: self.budget.as_millis() })
            }
        }
    }
}

fn run(
    workspace: &WorkspaceId,
    mut sandbox: Box<dyn Sandbox>,
    mut queue: mpsc::UnboundedReceiver<Job>,
    budget: Duration,
) {
    while let Some(job) = queue.blocking_recv() {
        match job {
            Job::Load { path, source, ticket } => match ticket.accept() {
                Some(reply) => {
                    let _ = reply.send(sandbox.load(&path, &source, budget));
                }
                None => skipped(workspace, &path, "load"),
            },
            Job::Call { path, function, args, ticket } => match ticket.accept() {
                Some(reply) => {
                    let _ = reply.send(sandbox.call(&path, &function, args, budget));
                }
                None => skipped(workspace, &path, &function),
            },
            Job::Unload { path } => sandbox.unload(&path),
            Job::SharedState { ticket } => {
                if let Some(reply) = ticket.accept() {
                    let _ = reply.send(sandbox.shared_state());
                }
            }
        }
    }
    tracing::info!(workspace = %workspace, "sandbox stopped");
}

fn skipped(workspace: &WorkspaceId, path: &ScriptPath, job: &str) {
    tracing::debug!(workspace = %workspace, path = %path, job, "caller gone, job skipped");
}
