//! Watch session setup and execution.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::args::RunArgs;
use crate::config::ToolConfig;
use crate::project::{self, ScanProvider};
use crate::refresh::RefreshBroker;
use crate::watch::{CommandAgent, WatchContext, WatchLoop};
use crate::watcher::WatcherOptions;

/// Wire up provider, broker, agent, and context, then run the loop until
/// cancellation. Setup failures (no project, bad command) are fatal here,
/// before the loop starts.
pub async fn run_watch(args: &RunArgs, cancel: CancellationToken) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = project::discover(args.project.as_deref(), &cwd)?;
    let config = ToolConfig::load(&project.manifest)?;

    let ctx = WatchContext::new(
        project.clone(),
        &config,
        &args.command,
        args.hot,
        args.grace_ms,
    )?;

    let watcher_options = WatcherOptions::from_config(&config.watch, args.poll);
    if watcher_options.poll {
        crate::log!("watch"; "polling file watcher is enabled");
    }

    let provider = ScanProvider::new(
        config.watch.roots(&project.root),
        project.manifest.clone(),
    );
    let mut watch_loop = WatchLoop::new(Box::new(provider), watcher_options);

    if config.refresh.enabled {
        match RefreshBroker::start(&config.refresh) {
            Ok(broker) => watch_loop = watch_loop.with_broker(broker),
            Err(e) => crate::warn!("refresh"; "endpoint failed to start ({}), continuing without browser refresh", e),
        }
    }

    if !config.run.hot_apply.is_empty() {
        watch_loop = watch_loop.with_agent(Box::new(CommandAgent::new(
            config.run.hot_apply.clone(),
            config.run.working_dir_or(&project.root).to_path_buf(),
        )));
    }

    watch_loop.run(ctx, cancel).await
}
