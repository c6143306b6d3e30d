//! SingleShotOperation runner.
//!
//! Every tool in this crate has the same shape: validate positional arguments,
//! acquire exactly one external resource, perform exactly one operation
//! through it, release it, and map the outcome to an exit status plus a
//! diagnostic. `run_scoped` owns the acquire/perform/release sequence so an
//! operation can never skip the release, even when it panics.
//! `run_single_shot` adds argument validation and the exit contract on top.

use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{ErrorKind, OpsError};
use crate::invocation::Invocation;

/// An opened connection to one external system.
#[async_trait]
pub trait ResourceHandle: Send + Sized {
    /// Close the underlying connection. The runner calls this exactly once per
    /// acquired handle; failures here are logged, never surfaced.
    async fn release(self);
}

/// Acquires the single resource an invocation needs.
#[async_trait]
pub trait Connector: Send + Sync {
    type Handle: ResourceHandle;

    /// Description of the external system, used in logs and diagnostics.
    fn target(&self) -> String;

    async fn acquire(&self) -> crate::Result<Self::Handle>;
}

/// The one domain operation performed against an acquired handle.
#[async_trait]
pub trait Operation<H: Send>: Send + Sync {
    type Output: Send;

    async fn perform(&self, handle: &mut H) -> crate::Result<Self::Output>;
}

/// How failure maps onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitContract {
    /// Failure exits non-zero.
    Propagate,
    /// Always exit 0; failure is visible only on the diagnostic stream.
    /// Required by callers (rule execution via `msiExecCmd`) that cannot
    /// tolerate a non-zero exit.
    AlwaysSucceed,
}

impl ExitContract {
    pub fn failure_status(self) -> ExitStatus {
        match self {
            ExitContract::Propagate => ExitStatus::FAILURE,
            ExitContract::AlwaysSucceed => ExitStatus::SUCCESS,
        }
    }
}

/// Process exit status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(u8);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    pub const FAILURE: ExitStatus = ExitStatus(1);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.0)
    }
}

/// Standard output (payloads only) and the diagnostic stream.
pub struct Streams<'a> {
    pub stdout: &'a mut (dyn Write + Send),
    pub stderr: &'a mut (dyn Write + Send),
}

impl<'a> Streams<'a> {
    pub fn new(stdout: &'a mut (dyn Write + Send), stderr: &'a mut (dyn Write + Send)) -> Self {
        Self { stdout, stderr }
    }

    /// Write a payload to stdout. Empty payloads write nothing.
    pub fn payload(&mut self, text: &str) -> std::io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if text.ends_with('\n') {
            write!(self.stdout, "{}", text)?;
        } else {
            writeln!(self.stdout, "{}", text)?;
        }
        self.stdout.flush()
    }

    /// Write a diagnostic line to stderr. Best effort: stderr is the channel
    /// failures are reported on, so there is nowhere left to report its own.
    pub fn diagnostic(&mut self, text: &str) {
        let _ = writeln!(self.stderr, "{}", text);
        let _ = self.stderr.flush();
    }
}

/// Static description of one positional single-shot tool.
pub struct ToolSpec {
    pub name: &'static str,
    /// Usage diagnostic written when arguments are missing.
    pub usage: &'static str,
    /// Mandatory positional field names, in order.
    pub fields: &'static [&'static str],
    pub contract: ExitContract,
    /// Renders the diagnostic for acquisition and operation failures.
    pub describe_failure: fn(&Invocation, &OpsError) -> String,
}

/// Acquire one handle, perform `op` against it, and release it on every path.
///
/// A panic inside the operation is caught, the handle is still released, and
/// the panic surfaces as `OpsError::Unexpected`. A panic while acquiring or
/// releasing surfaces the same way.
pub async fn run_scoped<C, O>(connector: &C, op: &O) -> crate::Result<O::Output>
where
    C: Connector,
    O: Operation<C::Handle>,
{
    let target = connector.target();
    let start = Instant::now();

    let outcome = AssertUnwindSafe(acquire_perform_release(connector, op, &target))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(OpsError::Unexpected(panic_message(panic))));

    tracing::info!(
        target_system = %target,
        ok = outcome.is_ok(),
        duration_ms = %start.elapsed().as_millis(),
        "single-shot operation finished"
    );
    outcome
}

async fn acquire_perform_release<C, O>(
    connector: &C,
    op: &O,
    target: &str,
) -> crate::Result<O::Output>
where
    C: Connector,
    O: Operation<C::Handle>,
{
    let mut handle = connector.acquire().await?;
    tracing::debug!(target_system = %target, "resource acquired");

    let outcome = AssertUnwindSafe(op.perform(&mut handle))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(OpsError::Unexpected(panic_message(panic))));

    handle.release().await;
    outcome
}

/// Run a positional tool end to end and return its exit status.
///
/// `build` turns the validated invocation into the connector and operation;
/// it may reject malformed arguments, in which case nothing is acquired.
pub async fn run_single_shot<C, O, F>(
    spec: &ToolSpec,
    invocation: &Invocation,
    streams: &mut Streams<'_>,
    build: F,
) -> ExitStatus
where
    C: Connector,
    O: Operation<C::Handle>,
    O::Output: AsRef<str>,
    F: FnOnce(&Invocation) -> crate::Result<(C, O)>,
{
    let prepared = invocation.require(spec.usage, spec.fields).and_then(|()| {
        std::panic::catch_unwind(AssertUnwindSafe(|| build(invocation)))
            .unwrap_or_else(|panic| Err(OpsError::Unexpected(panic_message(panic))))
    });

    let (connector, op) = match prepared {
        Ok(parts) => parts,
        Err(err) => {
            tracing::debug!(tool = spec.name, error = %err, "argument validation failed");
            streams.diagnostic(&render_failure(spec, invocation, &err));
            return spec.contract.failure_status();
        }
    };

    match run_scoped(&connector, &op).await {
        Ok(payload) => match streams.payload(payload.as_ref()) {
            Ok(()) => ExitStatus::SUCCESS,
            Err(e) => {
                tracing::warn!(tool = spec.name, error = %e, "payload write failed");
                streams.diagnostic(&format!("cannot write result to stdout: {}", e));
                spec.contract.failure_status()
            }
        },
        Err(err) => {
            tracing::warn!(tool = spec.name, kind = %err.kind(), error = %err, "operation failed");
            streams.diagnostic(&render_failure(spec, invocation, &err));
            spec.contract.failure_status()
        }
    }
}

fn render_failure(spec: &ToolSpec, invocation: &Invocation, err: &OpsError) -> String {
    match err.kind() {
        ErrorKind::Argument => err.to_string(),
        ErrorKind::Unexpected => {
            format!("{} [{}]", (spec.describe_failure)(invocation, err), err.kind())
        }
        _ => (spec.describe_failure)(invocation, err),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}
