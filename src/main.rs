//! devloop - watch-rebuild development loop with live browser refresh.
//!
//! Environment variables:
//!
//!   DEVLOOP_POLLER
//!   When set to `1` or `true`, poll the filesystem for changes. Required
//!   for some filesystems, such as network shares and container mounts.
//!
//!   DEVLOOP
//!   Set to `1` on every child process devloop launches.
//!
//!   DEVLOOP_ITERATION
//!   Set to `1` on the first launch and incremented each time a file change
//!   restarts the command.
//!
//!   DEVLOOP_REFRESH_URL
//!   The refresh endpoint address, handed to the child so its page script
//!   can connect back.

#![allow(dead_code)]

mod cli;
mod config;
mod core;
mod logger;
mod process;
mod project;
mod refresh;
mod watch;
mod watcher;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    let cancel = core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    logger::set_quiet(cli.quiet);
    logger::set_verbose(cli.verbose || global_verbose());

    match &cli.command {
        Commands::Run { args } => run_session(args, cancel),
        Commands::List { project } => cli::list::run_list(project.as_deref()),
    }
}

/// Run the watch session on a fresh runtime.
fn run_session(args: &cli::RunArgs, cancel: CancellationToken) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(cli::run::run_watch(args, cancel))
}

fn global_verbose() -> bool {
    matches!(
        std::env::var("DEVLOOP_VERBOSE").as_deref(),
        Ok("1") | Ok("true")
    )
}
