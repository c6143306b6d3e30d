//! `gen-uuid TYPE [NAMESPACE NAME]`

use std::process::ExitCode;

use irods_ops::uuidgen::gen_uuid;
use irods_ops::{ExitContract, Invocation, Streams, telemetry};

fn main() -> ExitCode {
    telemetry::init_tracing();
    let invocation = Invocation::from_env();
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(ExitContract::Propagate, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        gen_uuid(&invocation, &mut streams).await
    })
}
