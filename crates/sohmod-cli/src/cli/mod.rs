//! CLI for the sohmod mod installer.
//!
//! Every command resolves to a process exit code: 0 success, 1 parse error,
//! 2 fetch error, 3 extract error, 4 commit error, 5 conflict.

mod commands;
mod control_socket;
mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sohmod_core::config::{self, PipelineConfig};
use std::path::PathBuf;

use commands::{run_checksum, run_handle, run_install, run_list, run_serve, InstallInput};

/// Top-level CLI for the sohmod mod installer.
#[derive(Debug, Parser)]
#[command(name = "sohmod", version)]
#[command(about = "Ship of Harkinian mod installer: fetch, verify, extract and install mod archives", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/sohmod/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Mods root to install into (overrides the config file).
    #[arg(long, global = true, value_name = "DIR")]
    pub mods_root: Option<PathBuf>,

    /// Print pipeline events as JSON lines instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Install a mod, from a raw invocation or from explicit fields.
    Install {
        /// Raw invocation, e.g. `shipofharkinian:https://host/mod.zip,CoolMod,12345`.
        #[arg(required_unless_present = "url", conflicts_with_all = ["url", "name", "id"])]
        raw: Option<String>,
        /// Archive URL.
        #[arg(long, requires = "name")]
        url: Option<String>,
        /// Directory name under the mods root.
        #[arg(long, requires = "url")]
        name: Option<String>,
        /// Optional mod identifier.
        #[arg(long, requires = "url")]
        id: Option<String>,
    },

    /// Protocol-handler entry: relay to a running `sohmod serve`, or install here.
    Handle {
        /// Raw invocation as delivered by the OS.
        raw: String,
    },

    /// Stay running and accept relayed invocations on the control socket.
    Serve,

    /// List installed mods.
    List,

    /// Compute SHA-256 of a file (e.g. a downloaded archive).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl Cli {
    /// Load the config (explicit file or XDG default) and apply overrides.
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let cfg = match &self.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);
        let mut pipeline = cfg.pipeline_config().context("resolve mods root")?;
        if let Some(root) = &self.mods_root {
            pipeline.mods_root = root.clone();
        }
        Ok(pipeline)
    }
}

impl CliCommand {
    /// Parse arguments, run the command, and return the exit code.
    pub async fn run_from_args() -> Result<i32> {
        let cli = Cli::parse();
        let json = cli.json;

        match &cli.command {
            CliCommand::Install { raw, url, name, id } => {
                let input = match (raw, url, name) {
                    (Some(raw), _, _) => InstallInput::Raw(raw.clone()),
                    (None, Some(url), Some(name)) => InstallInput::Parts {
                        url: url.clone(),
                        name: name.clone(),
                        id: id.clone(),
                    },
                    _ => anyhow::bail!("install needs a raw invocation or --url and --name"),
                };
                run_install(cli.pipeline_config()?, input, json).await
            }
            CliCommand::Handle { raw } => run_handle(cli.pipeline_config()?, raw, json).await,
            CliCommand::Serve => run_serve(cli.pipeline_config()?, json).await,
            CliCommand::List => run_list(&cli.pipeline_config()?, json),
            CliCommand::Checksum { path } => run_checksum(path),
        }
    }
}

#[cfg(test)]
mod tests;
