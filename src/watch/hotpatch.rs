//! In-place code delta application seam.
//!
//! The actual patching mechanism lives outside this tool (a runtime agent,
//! a compiler daemon). The loop only cares about the outcome: applied,
//! unsupported, or failed. Anything but `Applied` falls back to a full
//! restart.

use std::path::PathBuf;
use std::process::Command;

use crate::watcher::ChangeEvent;

/// Result of one delta-apply attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Delta landed in the running process; no restart needed.
    Applied,
    /// The agent cannot express this change as a delta.
    Unsupported,
    Failed(String),
}

/// External capability that applies a code delta to the running process.
pub trait HotPatchAgent: Send + Sync {
    fn apply(&self, changes: &[ChangeEvent]) -> PatchOutcome;
}

/// Exit code by which a command agent reports an unsupported change.
const UNSUPPORTED_EXIT: i32 = 3;

/// Command-driven agent: runs the configured command with the changed paths
/// appended as arguments. Exit 0 means applied, exit 3 means unsupported,
/// anything else is a failure.
pub struct CommandAgent {
    command: Vec<String>,
    working_dir: PathBuf,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command,
            working_dir,
        }
    }
}

impl HotPatchAgent for CommandAgent {
    fn apply(&self, changes: &[ChangeEvent]) -> PatchOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return PatchOutcome::Unsupported;
        };

        let status = Command::new(program)
            .args(args)
            .args(changes.iter().map(|c| c.path.as_os_str()))
            .current_dir(&self.working_dir)
            .status();

        match status {
            Ok(status) if status.success() => PatchOutcome::Applied,
            Ok(status) if status.code() == Some(UNSUPPORTED_EXIT) => PatchOutcome::Unsupported,
            Ok(status) => PatchOutcome::Failed(format!("agent exited with {status}")),
            Err(e) => PatchOutcome::Failed(format!("agent failed to start: {e}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::watcher::ChangeKind;
    use std::time::Instant;

    fn change(path: &str) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(path),
            kind: ChangeKind::Modified,
            at: Instant::now(),
        }
    }

    fn agent(script: &str) -> CommandAgent {
        CommandAgent::new(
            vec!["sh".into(), "-c".into(), script.into(), "sh".into()],
            std::env::temp_dir(),
        )
    }

    #[test]
    fn test_exit_zero_is_applied() {
        assert_eq!(
            agent("exit 0").apply(&[change("/p/a.rs")]),
            PatchOutcome::Applied
        );
    }

    #[test]
    fn test_exit_three_is_unsupported() {
        assert_eq!(
            agent("exit 3").apply(&[change("/p/a.rs")]),
            PatchOutcome::Unsupported
        );
    }

    #[test]
    fn test_other_exit_is_failure() {
        let outcome = agent("exit 1").apply(&[change("/p/a.rs")]);
        assert!(matches!(outcome, PatchOutcome::Failed(_)));
    }

    #[test]
    fn test_changed_paths_passed_as_arguments() {
        // `$1` is the first changed path thanks to the explicit argv0
        let outcome =
            agent("test \"$1\" = /p/a.rs").apply(&[change("/p/a.rs"), change("/p/b.rs")]);
        assert_eq!(outcome, PatchOutcome::Applied);
    }

    #[test]
    fn test_missing_program_is_failure() {
        let agent = CommandAgent::new(
            vec!["devloop-test-no-such-agent".into()],
            std::env::temp_dir(),
        );
        assert!(matches!(
            agent.apply(&[change("/p/a.rs")]),
            PatchOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_empty_command_is_unsupported() {
        let agent = CommandAgent::new(vec![], std::env::temp_dir());
        assert_eq!(agent.apply(&[change("/p/a.rs")]), PatchOutcome::Unsupported);
    }
}
