//! `amqptopicsend-irods EPHEMERAL ROUTING_KEY BODY`
//!
//! Declares the `irods` topic exchange and publishes one persistent message.

use std::process::ExitCode;

use irods_ops::broker::{IRODS_TOPIC_SEND, run_irods_topic_send};
use irods_ops::{Invocation, Streams, telemetry};

fn main() -> ExitCode {
    telemetry::init_tracing();
    let contract = IRODS_TOPIC_SEND.contract;
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => return irods_ops_cli::setup_failed(contract, e),
    };
    let invocation = Invocation::from_env();
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        run_irods_topic_send(&invocation, &config.amqp, &mut streams).await
    })
}
