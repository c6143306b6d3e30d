//! `bisque-ops`: list, link, copy, move and remove BisQue resources by iRODS path.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use irods_ops::catalog::{BISQUE_OPS, CatalogArgs, bisque_ops};
use irods_ops::{Streams, telemetry};

/// Manage BisQue resources backed by iRODS objects.
#[derive(Parser)]
#[command(name = "bisque-ops", version)]
struct Cli {
    /// Act on behalf of this BisQue user
    #[arg(long)]
    alias: Option<String>,
    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
    /// BisQue host URL [default: [bisque] host]
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Credentials as USER:PASSWORD [default: [bisque] admin_user/admin_pass]
    #[arg(short, long)]
    credentials: Option<String>,
    /// XML document whose root children are attached to linked resources
    #[arg(short = 'T', long)]
    tag_file: Option<PathBuf>,
    /// Output in the format expected by the iRODS rules and prefix bare paths
    /// with the configured iRODS host
    #[arg(short = 'C', long)]
    compatible: bool,
    /// Permission for linked resources
    #[arg(short = 'P', long, default_value = "private")]
    permission: String,
    /// One of ls, ln, cp, mv, rm
    command: String,
    /// Paths; with more than one, the last is the destination
    #[arg(required = true)]
    paths: Vec<String>,
}

impl From<Cli> for CatalogArgs {
    fn from(cli: Cli) -> Self {
        CatalogArgs {
            command: cli.command,
            paths: cli.paths,
            alias: cli.alias,
            host: cli.host,
            credentials: cli.credentials,
            tag_file: cli.tag_file,
            compatible: cli.compatible,
            permission: cli.permission,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let contract = BISQUE_OPS.contract;
    let config = match irods_ops_cli::load_config() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing();
            return irods_ops_cli::setup_failed(contract, e);
        }
    };
    let level = if cli.debug { "debug" } else { "info" };
    match &config.bisque.log_file {
        Some(path) => telemetry::init_file_tracing(path, level),
        None => telemetry::init_tracing(),
    }

    let args = CatalogArgs::from(cli);
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        bisque_ops(&args, &config.bisque, &mut streams).await
    })
}
