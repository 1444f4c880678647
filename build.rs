//! Build script rendering man pages for both binaries.
//!
//! `stevedore.1` and `stevedore-lsx.1` land in the build output directory
//! for packaging, generated with clap-mangen from the binaries' own parsers.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

#[path = "src/cli/lsx.rs"]
mod lsx;

fn render(command: clap::Command, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let page = out_dir.join(format!("{}.1", command.get_name()));
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    File::create(page)?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    for source in ["build.rs", "src/cli/mod.rs", "src/cli/lsx.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={source}")?;
    }

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    render(cli::Cli::command(), &out_dir)?;
    render(lsx::LsxCli::command(), &out_dir)?;
    Ok(())
}
