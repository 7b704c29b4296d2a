//! `devloop list`: print the resolved watch set.
//!
//! Bypasses the loop entirely. Resolution runs in the lenient "wait on
//! error" mode: a failure is reported and resolution retried after a delay,
//! so the user can fix the project without relaunching.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::config::ToolConfig;
use crate::project::{self, FileSetProvider, ScanProvider};

const RETRY_DELAY: Duration = Duration::from_secs(1);

pub fn run_list(project_arg: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = project::discover(project_arg, &cwd)?;
    let config = ToolConfig::load(&project.manifest)?;

    let provider = ScanProvider::new(
        config.watch.roots(&project.root),
        project.manifest.clone(),
    );

    loop {
        match provider.resolve() {
            Ok(set) => {
                for path in set.sorted_paths() {
                    println!("{}", path.display());
                }
                return Ok(());
            }
            Err(e) => {
                crate::error!("{:#}", e);
                crate::log!("watch"; "fix the error to continue, or press Ctrl+C to exit");
                std::thread::sleep(RETRY_DELAY);
                if crate::core::is_shutdown() {
                    return Ok(());
                }
            }
        }
    }
}
