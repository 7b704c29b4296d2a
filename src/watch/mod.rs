//! The watch loop.
//!
//! Repeats: resolve the watch set → wait for a change → hot-apply or
//! restart → notify connected browsers → loop. One cancellation source
//! covers every suspension point; on cancellation any live child is stopped
//! within the grace window, the broker is torn down, and the loop exits
//! without error.
//!
//! ```text
//! Idle → Watching → Building → {HotApply | Restarting} → Watching …
//!                                                      ↘ Shutdown
//! ```

mod context;
mod hotpatch;

pub use context::WatchContext;
pub use hotpatch::{CommandAgent, HotPatchAgent, PatchOutcome};

use std::path::Path;

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;

use crate::logger::WatchStatus;
use crate::process::{ExitOutcome, ProcessSupervisor};
use crate::project::FileSetProvider;
use crate::refresh::{ClientReport, RefreshBroker, RefreshMessage};
use crate::watcher::{ChangeEvent, ChangeKind, FileChangeWatcher, WatcherOptions};

/// Loop states; transitions are logged at verbose level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Idle,
    Watching,
    Building,
    HotApply,
    Restarting,
    Shutdown,
}

impl WatchState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Building => "building",
            Self::HotApply => "hot-apply",
            Self::Restarting => "restarting",
            Self::Shutdown => "shutdown",
        }
    }
}

/// The top-level coordinator: composes provider, watcher, supervisor, and
/// broker into repeated watch iterations.
pub struct WatchLoop {
    provider: Box<dyn FileSetProvider>,
    watcher_options: WatcherOptions,
    supervisor: ProcessSupervisor,
    broker: Option<RefreshBroker>,
    agent: Option<Box<dyn HotPatchAgent>>,
    state: WatchState,
    status: WatchStatus,
}

impl WatchLoop {
    pub fn new(provider: Box<dyn FileSetProvider>, watcher_options: WatcherOptions) -> Self {
        Self {
            provider,
            watcher_options,
            supervisor: ProcessSupervisor::new(),
            broker: None,
            agent: None,
            state: WatchState::Idle,
            status: WatchStatus::new(),
        }
    }

    /// Attach the refresh broker for this session.
    pub fn with_broker(mut self, broker: RefreshBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Attach the delta-apply agent used in hot-reload mode.
    pub fn with_agent(mut self, agent: Box<dyn HotPatchAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Run the session until cancellation (clean exit) or a fatal error.
    /// The child and the broker are torn down on both paths.
    pub async fn run(mut self, mut ctx: WatchContext, cancel: CancellationToken) -> Result<()> {
        let result = self.drive(&mut ctx, &cancel).await;

        self.transition(WatchState::Shutdown);
        self.supervisor.shutdown_graceful(ctx.grace).await;
        if let Some(broker) = self.broker.take() {
            broker.shutdown();
        }
        crate::log!("watch"; "stopped");

        result
    }

    async fn drive(&mut self, ctx: &mut WatchContext, cancel: &CancellationToken) -> Result<()> {
        let endpoint = self.broker.as_ref().map(|b| b.endpoint().to_string());

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            // Fresh snapshot every iteration, never reused stale.
            let set = self
                .provider
                .resolve()
                .context("failed to resolve the watch set")?;
            crate::debug!("watch"; "watching {} file(s)", set.len());

            // Watcher attaches before the launch so changes made while the
            // child builds are not lost.
            let mut watcher = FileChangeWatcher::start(set, &self.watcher_options)?;

            if !self.supervisor.has_child() {
                self.launch(ctx, endpoint.as_deref());
            }

            self.transition(WatchState::Watching);
            let batch = match self.next_wake(&mut watcher, cancel).await? {
                Some(batch) => batch,
                None => return Ok(()), // cancelled
            };
            drop(watcher);

            self.transition(WatchState::Building);
            for event in &batch {
                crate::log!("watch"; "{}: {}", event.kind.label(), event.path.display());
            }

            if self.try_hot_apply(ctx, &batch) {
                continue;
            }

            self.restart(ctx, endpoint.as_deref(), cancel).await;
        }
    }

    /// Suspend until a qualifying change batch arrives. A child exit is
    /// reported and watching continues; cancellation yields `None` with the
    /// child already stopped.
    async fn next_wake(
        &mut self,
        watcher: &mut FileChangeWatcher,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ChangeEvent>>> {
        enum Wake {
            Changed(Result<Vec<ChangeEvent>, crate::watcher::WatchError>),
            Child(Result<ExitOutcome>),
            Cancelled,
        }

        loop {
            let has_child = self.supervisor.has_child();
            let wake = tokio::select! {
                biased;
                batch = watcher.next_batch() => Wake::Changed(batch),
                outcome = self.supervisor.wait(cancel), if has_child => Wake::Child(outcome),
                _ = cancel.cancelled(), if !has_child => Wake::Cancelled,
            };

            match wake {
                Wake::Changed(Ok(batch)) => return Ok(Some(batch)),
                Wake::Changed(Err(e)) => return Err(e.into()),
                Wake::Child(Ok(ExitOutcome::Exited(code))) => {
                    // No automatic relaunch: the next file change restarts.
                    self.report_exit(code);
                }
                Wake::Child(Ok(ExitOutcome::Cancelled)) => return Ok(None),
                Wake::Child(Err(e)) => return Err(e),
                Wake::Cancelled => return Ok(None),
            }
        }
    }

    fn report_exit(&mut self, code: Option<i32>) {
        match code {
            Some(0) => self.status.info("exited, waiting for a file change"),
            Some(code) => self.status.error(
                &format!("exited with code {code}"),
                "waiting for a file change before restarting",
            ),
            None => self.status.error(
                "killed by a signal",
                "waiting for a file change before restarting",
            ),
        }
    }

    /// Attempt an in-place delta apply. Returns true when the change landed
    /// and no restart is needed.
    fn try_hot_apply(&mut self, ctx: &WatchContext, batch: &[ChangeEvent]) -> bool {
        if !ctx.hot_reload || !self.supervisor.has_child() {
            return false;
        }
        if self.agent.is_none() {
            return false;
        }
        if !hot_apply_eligible(batch, &ctx.project.manifest) {
            crate::debug!("watch"; "change not hot-apply eligible, restarting");
            return false;
        }

        self.transition(WatchState::HotApply);
        let agent = self.agent.as_ref().expect("agent presence checked above");
        match agent.apply(batch) {
            PatchOutcome::Applied => {
                self.status.success(&format!(
                    "hot patch applied ({} file{})",
                    batch.len(),
                    if batch.len() == 1 { "" } else { "s" }
                ));
                if let Some(broker) = &self.broker {
                    let paths = batch
                        .iter()
                        .map(|e| e.path.display().to_string())
                        .collect();
                    broker.send_json(&RefreshMessage::applied(paths));
                    self.drain_client_report();
                }
                true
            }
            PatchOutcome::Unsupported => {
                crate::debug!("watch"; "delta not supported for this change, restarting");
                false
            }
            PatchOutcome::Failed(reason) => {
                crate::warn!("watch"; "hot patch failed ({}), restarting", reason);
                false
            }
        }
    }

    /// Surface a pending page diagnostic, if one arrived.
    fn drain_client_report(&self) {
        let Some(broker) = &self.broker else { return };
        let Some(text) = broker.receive() else { return };
        match ClientReport::from_json(&text) {
            Some(ClientReport::Diagnostic { message, .. }) => {
                crate::warn!("refresh"; "page reported: {}", message);
            }
            None => crate::debug!("refresh"; "unrecognized client payload: {}", text),
        }
    }

    /// Stop-and-relaunch cycle: wait signal first so connected pages show a
    /// building state instead of stale content, reload only once the new
    /// process is confirmed running.
    async fn restart(
        &mut self,
        ctx: &mut WatchContext,
        endpoint: Option<&str>,
        cancel: &CancellationToken,
    ) {
        self.transition(WatchState::Restarting);
        if let Some(broker) = &self.broker {
            broker.send_wait();
        }

        self.supervisor.shutdown_graceful(ctx.grace).await;
        if cancel.is_cancelled() {
            return;
        }

        ctx.iteration += 1;
        if self.launch(ctx, endpoint) {
            if let Some(broker) = &self.broker {
                broker.send_reload();
            }
            self.status
                .success(&format!("restarted (iteration {})", ctx.iteration));
        }
    }

    /// Launch the child. A failure is reported and the loop resumes
    /// watching; the next change retries.
    fn launch(&mut self, ctx: &WatchContext, endpoint: Option<&str>) -> bool {
        match self.supervisor.launch(&ctx.spec, ctx.iteration, endpoint) {
            Ok(()) => true,
            Err(e) => {
                self.status.error(
                    "launch failed",
                    &format!("{e:#}\nwaiting for a file change before retrying"),
                );
                false
            }
        }
    }

    fn transition(&mut self, to: WatchState) {
        if self.state != to {
            crate::debug!("watch"; "state: {} -> {}", self.state.label(), to.label());
            self.state = to;
        }
    }
}

/// A batch is hot-apply eligible when every change is a modification of a
/// plain source file. Added or removed files and manifest edits need the
/// full build, so they restart.
fn hot_apply_eligible(batch: &[ChangeEvent], manifest: &Path) -> bool {
    !batch.is_empty()
        && batch
            .iter()
            .all(|e| e.kind == ChangeKind::Modified && e.path != manifest)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RefreshConfig;
    use crate::process::ProcessSpec;
    use crate::project::{Project, ScanProvider};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tungstenite::Message;

    fn change(path: &str, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(path),
            kind,
            at: Instant::now(),
        }
    }

    #[test]
    fn test_eligibility_modified_sources_only() {
        let manifest = Path::new("/p/devloop.toml");

        assert!(hot_apply_eligible(
            &[change("/p/src/a.rs", ChangeKind::Modified)],
            manifest
        ));
        assert!(!hot_apply_eligible(&[], manifest));
        assert!(!hot_apply_eligible(
            &[change("/p/src/new.rs", ChangeKind::Added)],
            manifest
        ));
        assert!(!hot_apply_eligible(
            &[change("/p/src/old.rs", ChangeKind::Removed)],
            manifest
        ));
        assert!(!hot_apply_eligible(
            &[change("/p/devloop.toml", ChangeKind::Modified)],
            manifest
        ));
        // One ineligible change poisons the batch
        assert!(!hot_apply_eligible(
            &[
                change("/p/src/a.rs", ChangeKind::Modified),
                change("/p/src/new.rs", ChangeKind::Added),
            ],
            manifest
        ));
    }

    // ------------------------------------------------------------------
    // Session scenarios
    // ------------------------------------------------------------------

    struct Fixture {
        temp: TempDir,
        project: Project,
        provider: ScanProvider,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        let manifest = temp.path().join("devloop.toml");
        std::fs::write(&manifest, "").unwrap();

        let project = Project {
            manifest: manifest.clone(),
            root: temp.path().to_path_buf(),
        };
        let provider = ScanProvider::new(vec![temp.path().to_path_buf()], manifest);
        Fixture {
            temp,
            project,
            provider,
        }
    }

    fn sh_context(project: Project, script: &str, grace_ms: u64) -> WatchContext {
        WatchContext {
            project,
            spec: ProcessSpec {
                executable: PathBuf::from("/bin/sh"),
                working_dir: std::env::temp_dir(),
                args: vec!["-c".into(), script.into()],
                env: BTreeMap::new(),
            },
            iteration: 1,
            hot_reload: false,
            grace: Duration::from_millis(grace_ms),
        }
    }

    fn test_watcher_options() -> WatcherOptions {
        WatcherOptions {
            debounce: Duration::from_millis(50),
            poll: true,
            poll_interval: Duration::from_millis(20),
        }
    }

    fn wait_for_clients(broker: &RefreshBroker, n: usize) {
        for _ in 0..500 {
            if broker.client_count() >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("expected {n} connected client(s)");
    }

    /// Cancellation while waiting for a change: the loop exits cleanly and
    /// the live child is stopped before run returns.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_exits_cleanly() {
        let fixture = fixture();
        let ctx = sh_context(fixture.project.clone(), "sleep 30", 500);
        let looper = WatchLoop::new(Box::new(fixture.provider), test_watcher_options());

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), looper.run(ctx, cancel))
            .await
            .expect("loop should exit promptly");

        assert!(result.is_ok(), "cancellation is not an error");
        // Far less than the child's 30s sleep: it was stopped, not awaited
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    /// One connected client observes Wait then Reload across a restart.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_signals_wait_then_reload() {
        let _guard = crate::refresh::TEST_ENV_LOCK.lock();
        let fixture = fixture();
        let broker = RefreshBroker::start(&RefreshConfig::default()).unwrap();

        let (mut client, _) = tungstenite::connect(broker.endpoint()).unwrap();
        wait_for_clients(&broker, 1);

        let ctx = sh_context(fixture.project.clone(), "sleep 30", 500);
        let looper = WatchLoop::new(Box::new(fixture.provider), test_watcher_options())
            .with_broker(broker);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(looper.run(ctx, token));

        // Let the first iteration attach its watcher, then edit a source
        tokio::time::sleep(Duration::from_millis(500)).await;
        let src = fixture.temp.path().join("src/main.rs");
        let reader = tokio::task::spawn_blocking(move || {
            let first = client.read().unwrap();
            let second = client.read().unwrap();
            (first, second)
        });
        std::fs::write(&src, "fn main() { /* edited */ }").unwrap();

        let (first, second) = tokio::time::timeout(Duration::from_secs(10), reader)
            .await
            .expect("signals within timeout")
            .unwrap();
        assert_eq!(first, Message::Text("Wait".into()));
        assert_eq!(second, Message::Text("Reload".into()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("clean shutdown")
            .unwrap()
            .unwrap();
    }

    /// Hot-reload mode with an agreeable agent: no restart, the client gets
    /// the applied notification instead of Wait/Reload.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_hot_apply_skips_restart() {
        struct AlwaysApplies;
        impl HotPatchAgent for AlwaysApplies {
            fn apply(&self, _changes: &[ChangeEvent]) -> PatchOutcome {
                PatchOutcome::Applied
            }
        }

        let _guard = crate::refresh::TEST_ENV_LOCK.lock();
        let fixture = fixture();
        let broker = RefreshBroker::start(&RefreshConfig::default()).unwrap();
        let (mut client, _) = tungstenite::connect(broker.endpoint()).unwrap();
        wait_for_clients(&broker, 1);

        let mut ctx = sh_context(fixture.project.clone(), "sleep 30", 500);
        ctx.hot_reload = true;
        let looper = WatchLoop::new(Box::new(fixture.provider), test_watcher_options())
            .with_broker(broker)
            .with_agent(Box::new(AlwaysApplies));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(looper.run(ctx, token));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let src = fixture.temp.path().join("src/main.rs");
        let reader = tokio::task::spawn_blocking(move || client.read().unwrap());
        std::fs::write(&src, "fn main() { /* hot */ }").unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(10), reader)
            .await
            .expect("applied notification within timeout")
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        assert!(text.contains(r#""type":"applied""#), "got: {text}");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("clean shutdown")
            .unwrap()
            .unwrap();
    }
}
