//! Startup shared by the irods-ops binaries.
//!
//! Every binary runs one tool on a current-thread runtime. Setup failures
//! (configuration, runtime) are reported on stderr and mapped onto the tool's
//! exit contract, same as failures inside the tool.

use std::future::Future;
use std::process::ExitCode;

use anyhow::Context;
use irods_ops::{ExitContract, ExitStatus, OpsConfig};

/// Load the layered configuration.
pub fn load_config() -> anyhow::Result<OpsConfig> {
    OpsConfig::load().context("failed to load irods-ops configuration")
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")
}

/// Report a setup failure and return the exit code the contract allows.
pub fn setup_failed(contract: ExitContract, err: anyhow::Error) -> ExitCode {
    tracing::debug!(error = %format!("{:#}", err), "setup failed");
    eprintln!("{:#}", err);
    contract.failure_status().into()
}

/// Drive `tool` to completion and return its exit code.
pub fn run<Fut>(contract: ExitContract, tool: Fut) -> ExitCode
where
    Fut: Future<Output = ExitStatus>,
{
    match runtime() {
        Ok(runtime) => runtime.block_on(tool).into(),
        Err(e) => setup_failed(contract, e),
    }
}
