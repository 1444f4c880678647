//! Command-line definition for the `stevedore-lsx` executor.
//!
//! Kept apart from the `stevedore` parser so the executor binary and the
//! build script can include it without the rest of the crate.

use clap::{ArgAction, Parser};

/// Arguments accepted by `stevedore-lsx`.
#[derive(Debug, Parser)]
#[command(
    name = "stevedore-lsx",
    about = "Report host identity and local devices for a storage driver"
)]
pub(crate) struct LsxCli {
    /// Log to stderr (-v, -vv). Off by default because stderr carries
    /// structured errors.
    #[arg(short, long, action = ArgAction::Count)]
    pub(crate) verbose: u8,
    /// Driver whose executor runs, for example `mock` or `rbd`.
    pub(crate) driver: Option<String>,
    /// One of `supported`, `instanceID`, `nextDevice` or `localDevices`.
    pub(crate) command: Option<String>,
    /// Command arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) args: Vec<String>,
}
