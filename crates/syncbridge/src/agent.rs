//! Agent side of the bridge - runs on the parallel execution context.
//!
//! The host side (posting jobs, blocking for results) is in host.rs.
//!
//! The agent blocks on the mailbox until a job is posted, resolves the job's
//! operation in its [`Registry`], runs it and posts the outcome. Operations are
//! either plain functions ([`Executable`]) or futures ([`AsyncExecutable`]);
//! the latter are driven on a runtime owned by the agent thread. Everything
//! that can go wrong with a single job (unknown operation, malformed text, an
//! executable returning an error or panicking) is reported to the host as an
//! error outcome; the loop itself keeps serving.

use std::collections::HashMap;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use serde_json::Value;

use crate::bridge::codec::{decode_text, encode_text};
use crate::bridge::mailbox::Mailbox;
use crate::bridge::protocol::{ChannelState, Job, JobOutcome};
use crate::bridge::wait::{WaitOptions, WaitOutcome, wait_for_state};
use crate::config::AgentConfig;

/// Failure raised by an [`Executable`].
///
/// Carried back to the host inside the result payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Arguments had the wrong count or shape.
    #[error("invalid arguments: {message}")]
    InvalidArgs { message: String },

    /// The operation itself failed.
    #[error("{message}")]
    Failed { message: String },
}

impl JobError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// A unit of work the agent knows how to run.
pub trait Executable: Send + Sync + 'static {
    fn run(&self, args: Vec<Value>) -> Result<Value, JobError>;
}

impl<F> Executable for F
where
    F: Fn(Vec<Value>) -> Result<Value, JobError> + Send + Sync + 'static,
{
    fn run(&self, args: Vec<Value>) -> Result<Value, JobError> {
        self(args)
    }
}

/// A unit of work that completes asynchronously.
///
/// Driven on the agent's own runtime; the host stays blocked until the future
/// resolves.
#[async_trait::async_trait]
pub trait AsyncExecutable: Send + Sync + 'static {
    async fn run(&self, args: Vec<Value>) -> Result<Value, JobError>;
}

#[async_trait::async_trait]
impl<F, Fut> AsyncExecutable for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    async fn run(&self, args: Vec<Value>) -> Result<Value, JobError> {
        self(args).await
    }
}

#[derive(Clone)]
enum Operation {
    Blocking(Arc<dyn Executable>),
    Async(Arc<dyn AsyncExecutable>),
}

/// Operation name to executable.
#[derive(Default, Clone)]
pub struct Registry {
    ops: HashMap<String, Operation>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("ops", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `exec` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, exec: impl Executable) -> &mut Self {
        self.ops
            .insert(name.into(), Operation::Blocking(Arc::new(exec)));
        self
    }

    /// Register an async `exec` under `name`, replacing any previous entry.
    pub fn register_async(
        &mut self,
        name: impl Into<String>,
        exec: impl AsyncExecutable,
    ) -> &mut Self {
        self.ops.insert(name.into(), Operation::Async(Arc::new(exec)));
        self
    }

    pub fn with(mut self, name: impl Into<String>, exec: impl Executable) -> Self {
        self.register(name, exec);
        self
    }

    pub fn with_async(mut self, name: impl Into<String>, exec: impl AsyncExecutable) -> Self {
        self.register_async(name, exec);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run `job`, folding every failure into an error outcome.
    ///
    /// Async operations are spawned onto the current runtime so a panic
    /// surfaces as a join error instead of unwinding through the caller.
    pub async fn execute(&self, job: Job) -> JobOutcome {
        let (op, args) = job.into_parts();
        let Some(operation) = self.ops.get(&op).cloned() else {
            return JobOutcome::failed(format!("unknown operation: {op}"));
        };

        let result = match operation {
            Operation::Blocking(exec) => catch_unwind(AssertUnwindSafe(|| exec.run(args))),
            Operation::Async(exec) => {
                match tokio::spawn(async move { exec.run(args).await }).await {
                    Ok(result) => Ok(result),
                    Err(e) if e.is_panic() => Err(e.into_panic()),
                    Err(e) => return JobOutcome::failed(format!("operation {op} aborted: {e}")),
                }
            }
        };

        match result {
            Ok(Ok(value)) => JobOutcome::Ok(value),
            Ok(Err(e)) => JobOutcome::failed(e.to_string()),
            Err(panic) => {
                JobOutcome::failed(format!("operation {op} panicked: {}", panic_message(&*panic)))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// The serving end of a channel.
///
/// Owns a current-thread tokio runtime that drives async operations. Jobs run
/// one at a time, so nothing else competes for it.
pub struct Agent {
    mailbox: Arc<Mailbox>,
    registry: Registry,
    config: AgentConfig,
    runtime: tokio::runtime::Runtime,
}

impl Agent {
    pub fn new(
        mailbox: Arc<Mailbox>,
        registry: Registry,
        config: AgentConfig,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            mailbox,
            registry,
            config,
            runtime,
        })
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Serve jobs until a wait fails. Without a budget that never happens, so
    /// this only returns if the thread is torn down from outside.
    pub fn serve(&self) {
        tracing::info!(channel = %self.mailbox.id(), "Agent serving");
        let options = WaitOptions {
            total: None,
            step: self.config.step_timeout,
        };
        while wait_for_state(&self.mailbox, ChannelState::JobPosted, options).is_ok() {
            self.handle_job();
        }
        tracing::info!(channel = %self.mailbox.id(), "Agent exiting");
    }

    /// Serve jobs until `stop` is set. The flag is checked at least every
    /// `poll_interval`.
    pub fn serve_until(&self, stop: &AtomicBool) {
        tracing::info!(channel = %self.mailbox.id(), "Agent serving");
        let options = WaitOptions {
            total: Some(self.config.poll_interval),
            step: self.config.step_timeout,
        };
        while !stop.load(Ordering::Acquire) {
            match wait_for_state(&self.mailbox, ChannelState::JobPosted, options) {
                WaitOutcome::Ok => self.handle_job(),
                WaitOutcome::TimedOut => continue,
            }
        }
        tracing::info!(channel = %self.mailbox.id(), "Agent stopped");
    }

    /// Consume the posted job and post its outcome.
    ///
    /// Call only after `JobPosted` has been observed, and not from inside an
    /// async context: the job is driven to completion with `block_on`.
    pub fn handle_job(&self) {
        let channel = self.mailbox.id();
        let outcome = match self.read_job() {
            Ok(job) => {
                tracing::trace!(%channel, op = job.op(), args = job.args().len(), "Job received");
                self.runtime.block_on(self.registry.execute(job))
            }
            Err(message) => {
                tracing::warn!(%channel, error = %message, "Rejecting malformed job");
                JobOutcome::failed(message)
            }
        };

        if let JobOutcome::Err(ref error) = outcome {
            tracing::warn!(%channel, %error, "Job failed");
        }

        self.post_outcome(&outcome);
    }

    fn read_job(&self) -> Result<Job, String> {
        let bytes = self.mailbox.read().map_err(|e| e.to_string())?;
        let text = decode_text(&bytes).map_err(|e| e.to_string())?;
        Job::parse(&text).map_err(|e| e.to_string())
    }

    fn post_outcome(&self, outcome: &JobOutcome) {
        let channel = self.mailbox.id();
        let text = match outcome.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%channel, error = %e, "Failed to serialize outcome");
                // A plain string always serializes.
                JobOutcome::failed(e.to_string())
                    .to_text()
                    .unwrap_or_else(|_| String::from(r#"{"err":"unserializable outcome"}"#))
            }
        };

        let bytes = encode_text(&text);
        if self
            .mailbox
            .write(0, &bytes, ChannelState::ResultPosted)
            .is_err()
        {
            tracing::warn!(
                %channel,
                len = bytes.len(),
                capacity = self.mailbox.payload_capacity(),
                "Result does not fit mailbox, posting oversize marker"
            );
            self.mailbox
                .post_oversize(bytes.len(), ChannelState::ResultPosted);
        }
    }
}

/// A running agent thread. Dropping the handle stops and joins it.
pub struct AgentHandle {
    stop: Arc<AtomicBool>,
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop serving and wait for the thread. A job already running finishes
    /// first.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if thread.join().is_err() {
            tracing::error!(channel = %self.mailbox.id(), "Agent thread panicked");
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Start an agent on its own thread, serving `mailbox` until the returned
/// handle is shut down or dropped.
pub fn spawn_agent(
    mailbox: Arc<Mailbox>,
    registry: Registry,
    config: AgentConfig,
) -> io::Result<AgentHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let agent = Agent::new(Arc::clone(&mailbox), registry, config)?;

    let thread = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("syncbridge-agent".to_string())
            .spawn(move || agent.serve_until(&stop))?
    };
    tracing::debug!(channel = %mailbox.id(), "Agent thread spawned");

    Ok(AgentHandle {
        stop,
        mailbox,
        thread: Some(thread),
    })
}
