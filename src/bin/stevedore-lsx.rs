//! Host-local executor for Stevedore drivers.
//!
//! Invoked as `stevedore-lsx <driver> <command> [args...]`. Success prints a
//! JSON payload on stdout and exits 0; failure prints `{message, status}` on
//! stderr and exits with the code of the error kind.

use std::io;
use std::process;

use clap::Parser;
use stevedore::config::ServiceConfig;
use stevedore::executor::{report_failure, run_executor};
use stevedore::{DriverDeps, DriverRegistry, LocalExecutor, StevedoreConfig, StorageError, logging};

#[path = "../cli/lsx.rs"]
mod lsx;

use lsx::LsxCli;

#[tokio::main]
async fn main() {
    let cli = LsxCli::parse();
    if cli.verbose > 0 {
        logging::init(cli.verbose);
    }
    let exit_code = execute(cli).await.unwrap_or(1);
    process::exit(exit_code);
}

async fn execute(cli: LsxCli) -> io::Result<i32> {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let (Some(driver), Some(command)) = (cli.driver, cli.command) else {
        let usage = StorageError::Validation(String::from(
            "usage: stevedore-lsx <driver> <command> [args...]",
        ));
        return report_failure(&usage, &mut stderr);
    };
    match build_executor(&driver) {
        Ok(executor) => {
            run_executor(executor.as_ref(), &command, &cli.args, &mut stdout, &mut stderr).await
        }
        Err(err) => report_failure(&err, &mut stderr),
    }
}

/// Builds the executor for the first service using `driver`, or for a
/// service with default options when none is configured.
fn build_executor(driver: &str) -> Result<Box<dyn LocalExecutor>, StorageError> {
    let config = StevedoreConfig::load_without_cli_args()?;
    let service = config
        .service_configs()?
        .into_iter()
        .find(|service| service.driver == driver)
        .unwrap_or_else(|| ServiceConfig::new(driver, driver));
    DriverRegistry::builtin().create_executor(&service, &DriverDeps::from_config(&config))
}
