//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// devloop watch-rebuild CLI
///
/// The special separator `--` delimits devloop's own options from the child
/// command, e.g. `devloop run -- cargo run --release`.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch the project and restart the child command on changes
    #[command(visible_alias = "r")]
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Print the resolved watch set without starting the watcher
    #[command(visible_alias = "l")]
    List {
        /// Project manifest or directory (default: search upward from cwd)
        #[arg(short, long, value_hint = clap::ValueHint::AnyPath)]
        project: Option<PathBuf>,
    },
}

/// Run command arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Project manifest or directory (default: search upward from cwd)
    #[arg(short, long, value_hint = clap::ValueHint::AnyPath)]
    pub project: Option<PathBuf>,

    /// Poll the filesystem for changes instead of using OS notifications.
    /// Needed on network shares and some virtual filesystems.
    /// Also honored via DEVLOOP_POLLER=1.
    #[arg(long)]
    pub poll: bool,

    /// Attempt hot code delta apply instead of restarting
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub hot: Option<bool>,

    /// Graceful shutdown window in milliseconds before force kill
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// Child command (after `--`); overrides [run].command
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_child_command() {
        let cli =
            Cli::try_parse_from(["devloop", "run", "--poll", "--", "cargo", "run"]).unwrap();
        let Commands::Run { args } = cli.command else {
            panic!("expected run");
        };
        assert!(args.poll);
        assert_eq!(args.command, vec!["cargo", "run"]);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["devloop", "--quiet", "--verbose", "list"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_hot_flag_forms() {
        let cli = Cli::try_parse_from(["devloop", "run", "--hot", "--", "make"]).unwrap();
        let Commands::Run { args } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.hot, Some(true));

        let cli = Cli::try_parse_from(["devloop", "run", "--hot", "false", "--", "make"]).unwrap();
        let Commands::Run { args } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.hot, Some(false));
    }

    #[test]
    fn test_list_with_project() {
        let cli = Cli::try_parse_from(["devloop", "list", "-p", "web.devloop.toml"]).unwrap();
        let Commands::List { project } = cli.command else {
            panic!("expected list");
        };
        assert_eq!(project, Some(PathBuf::from("web.devloop.toml")));
    }
}
