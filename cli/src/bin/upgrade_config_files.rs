//! `upgrade-config-files`: bring iRODS configuration files to the installed schema version.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use irods_ops::upgrade::{
    DEFAULT_HOST_ACCESS_CONTROL_CONFIG, DEFAULT_HOSTS_CONFIG, DEFAULT_IRODS_ENVIRONMENT,
    DEFAULT_SERVER_CONFIG, DEFAULT_VERSION_FILE, UPGRADE_CONFIG_FILES, upgrade_config_files,
};
use irods_ops::{Streams, UpgradePaths, telemetry};

#[derive(Parser)]
#[command(name = "upgrade-config-files", version)]
struct Cli {
    #[arg(long, default_value = DEFAULT_VERSION_FILE)]
    version_file: PathBuf,
    #[arg(long, default_value = DEFAULT_SERVER_CONFIG)]
    server_config: PathBuf,
    #[arg(long, default_value = DEFAULT_HOSTS_CONFIG)]
    hosts_config: PathBuf,
    #[arg(long, default_value = DEFAULT_HOST_ACCESS_CONTROL_CONFIG)]
    host_access_control_config: PathBuf,
    /// Service account environment file
    #[arg(long, default_value = DEFAULT_IRODS_ENVIRONMENT)]
    irods_environment: PathBuf,
}

fn main() -> ExitCode {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let paths = UpgradePaths {
        version_file: cli.version_file,
        server_config: cli.server_config,
        hosts_config: cli.hosts_config,
        host_access_control_config: cli.host_access_control_config,
        irods_environment: cli.irods_environment,
    };
    let (mut stdout, mut stderr) = (std::io::stdout(), std::io::stderr());
    irods_ops_cli::run(UPGRADE_CONFIG_FILES.contract, async {
        let mut streams = Streams::new(&mut stdout, &mut stderr);
        upgrade_config_files(&paths, &mut streams).await
    })
}
