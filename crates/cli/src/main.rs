//! Command-line entry point for implmap.

use anyhow::Result;
use clap::Parser;
use implmap_compiler::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
