//! `insert2bisque BISQUE_HOST BISQUE_PASSWORD IRODS_HOST IRODS_PATH IRODS_USER PERMISSION LOG_FILE`
//!
//! Legacy registration of one iRODS object in BisQue. Logs go to LOG_FILE.

use std::path::Path;
use std::process::ExitCode;

use irods_ops::catalog::{INSERT2BISQUE, INSERT2BISQUE_LOG_FILE_ARG, insert2bisque};
use irods_ops::{Invocation, Streams, telemetry};

fn main() -> ExitCode {
    let invocation = Invocation::from_env();
    match invocation.get(INSERT2BISQUE_LOG_FILE_ARG) {
        Some(log_file) => telemetry::init_file_tracing(Path::new(log_file), "debug"),
        None => telemetry::init_tracing(),
    }
    let contract = INSERT2BISQUE.contract;
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => return irods_ops_cli::setup_failed(contract, e),
    };
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        insert2bisque(&invocation, &config.bisque, &mut streams).await
    })
}
