//! CLI tests, split by area.

use super::{Cli, CliCommand};
use clap::Parser;

pub(super) fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

pub(super) fn parse_err(args: &[&str]) -> clap::error::ErrorKind {
    Cli::try_parse_from(args).unwrap_err().kind()
}
