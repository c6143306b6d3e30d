//! `irods-user ARGS_FILE`: Ansible binary module creating or removing iRODS users.
//!
//! The result is always a JSON document on stdout, failures included.

use std::process::ExitCode;

use irods_ops::directory::{TaskResult, emit, run_irods_user};
use irods_ops::{ExitContract, Invocation, Streams, telemetry};

fn main() -> ExitCode {
    telemetry::init_tracing();
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => {
            let mut streams = Streams::new(&mut stdout, &mut stderr);
            return emit(&TaskResult::failure(format!("{:#}", e)), &mut streams).into();
        }
    };
    let invocation = Invocation::from_env();
    irods_ops_cli::run(ExitContract::Propagate, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        run_irods_user(&invocation, &config.irods_http, &mut streams).await
    })
}
