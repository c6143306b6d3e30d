//! `send-mail FROM TO SUBJECT BODY`

use std::process::ExitCode;

use irods_ops::mail::{SEND_MAIL, run_send_mail};
use irods_ops::{Invocation, Streams, telemetry};

fn main() -> ExitCode {
    telemetry::init_tracing();
    let contract = SEND_MAIL.contract;
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => return irods_ops_cli::setup_failed(contract, e),
    };
    let invocation = Invocation::from_env();
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        run_send_mail(&invocation, &config.mail, &mut streams).await
    })
}
