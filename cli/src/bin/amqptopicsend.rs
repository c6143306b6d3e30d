//! `amqptopicsend EXCHANGE ROUTING_KEY BODY`
//!
//! Publishes one persistent message. Always exits 0; failures are reported on
//! stderr only, since rule execution treats a non-zero exit as a rule error.

use std::process::ExitCode;

use irods_ops::broker::{TOPIC_SEND, run_topic_send};
use irods_ops::{Invocation, Streams, telemetry};

fn main() -> ExitCode {
    telemetry::init_tracing();
    let contract = TOPIC_SEND.contract;
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => return irods_ops_cli::setup_failed(contract, e),
    };
    let invocation = Invocation::from_env();
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        run_topic_send(&invocation, &config.amqp, &mut streams).await
    })
}
