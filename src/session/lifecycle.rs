/// Launch-serve-repack lifecycle
///
/// One foreground flow owns the workspace and the child. Two background
/// threads (exit waiter, store watcher) report into it and are stopped
/// through a single cancellation token. `Launcher::run` consumes the
/// launcher, so the teardown sequence can only ever run once.
use crate::config::launcher::LauncherConfig;
use crate::config::types::{Platform, Result};
use crate::exec::{launch, ChildProcess, EnvOverlay, LaunchSpec};
use crate::kernel::signal::ShutdownSource;
use crate::observability::journal::{SessionEvent, SessionJournal};
use crate::resources::{ArtifactImage, ResourceTable};
use crate::safety::{ExtractedPaths, Workspace};
use crate::session::cancel::cancel_pair;
use crate::session::repack::{RepackCoordinator, RepackOutcome};
use crate::session::watcher::{fingerprint_file, PollingWatcher, StoreWatch};
use crossbeam_channel::RecvTimeoutError;
use std::process::ExitStatus;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the foreground loop looks at pending shutdown requests
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The child exited on its own
    ChildExited,
    /// A termination request arrived; `signal` is set when it was a signal
    Requested { signal: Option<i32> },
}

#[derive(Debug)]
pub struct SessionOutcome {
    /// `None` when the child could not be reaped; teardown still ran
    pub child_exit: Option<ExitStatus>,
    pub trigger: ShutdownTrigger,
    pub repack: RepackOutcome,
    /// Termination requests that arrived after the first and were ignored
    pub ignored_requests: u32,
    pub journal: SessionJournal,
}

pub struct Launcher {
    image: ArtifactImage,
    table: ResourceTable,
    config: LauncherConfig,
    platform: Option<Platform>,
}

impl Launcher {
    pub fn new(image: ArtifactImage, table: ResourceTable, config: LauncherConfig) -> Self {
        Self {
            image,
            table,
            config,
            platform: None,
        }
    }

    /// Select resources for `platform` instead of the host's
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn run(self, shutdown: &dyn ShutdownSource) -> Result<SessionOutcome> {
        let Launcher {
            image,
            table,
            config,
            platform,
        } = self;
        config.validate()?;

        let mut journal = SessionJournal::new("pending");
        journal.record_path(SessionEvent::SessionStart, "launch", image.path());

        // Nothing touches the filesystem until the platform is known to be
        // served by this artifact.
        let platform = match platform {
            Some(platform) => platform,
            None => Platform::host()?,
        };
        table.runtime_for(platform)?;
        journal.record(SessionEvent::PlatformSelected, platform.to_string());

        let mut workspace = Workspace::create(&config.workspace_root())?;
        journal.set_session_id(workspace.session_id());
        journal.record_path(SessionEvent::WorkspaceCreated, "created", workspace.root());

        let paths = workspace.extract(&table, platform)?;
        journal.record_path(
            SessionEvent::ResourcesExtracted,
            format!("runtime for {}", platform),
            &paths.runtime_binary,
        );
        let initial = fingerprint_file(&paths.project_store)?;
        log::debug!("Initial store fingerprint {}", initial);

        let spec = launch_spec(&table, &paths, workspace.root(), config.port)?;
        let child = launch(&spec)?;
        journal.record(SessionEvent::ChildStarted, format!("pid {}", child.pid()));

        let (cancel, token) = cancel_pair();
        let watcher = PollingWatcher::new(&paths.project_store, initial, config.poll_interval());
        let background = watcher
            .start(token)
            .and_then(|watch| child.spawn_exit_waiter(EXIT_POLL).map(|waiter| (watch, waiter)));
        let (watch_thread, (waiter_thread, exit_rx)) = match background {
            Ok(threads) => threads,
            Err(e) => {
                cancel.cancel();
                if let Err(stop) = child.cancel(config.grace_period()) {
                    log::warn!("Failed to stop child after setup error: {}", stop);
                }
                return Err(e.into());
            }
        };

        log::info!(
            "Serving on port {} (store: {})",
            config.port,
            paths.project_store.display()
        );

        let flag = watcher.flag();
        let mut mutation_recorded = false;
        let trigger = loop {
            if !mutation_recorded && flag.is_set() {
                journal.record_path(SessionEvent::MutationDetected, "store modified", &paths.project_store);
                mutation_recorded = true;
            }
            if shutdown.shutdown_requested() {
                break ShutdownTrigger::Requested {
                    signal: shutdown.last_signal(),
                };
            }
            match exit_rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(_) | Err(RecvTimeoutError::Disconnected) => break ShutdownTrigger::ChildExited,
                Err(RecvTimeoutError::Timeout) => {}
            }
        };
        let handled_requests = shutdown.requests();

        match trigger {
            ShutdownTrigger::Requested { signal } => {
                let details = match signal {
                    Some(sig) => format!("signal {}", sig),
                    None => "shutdown requested".to_string(),
                };
                log::info!("Shutting down ({})", details);
                journal.record(SessionEvent::ShutdownRequested, details);
            }
            ShutdownTrigger::ChildExited => log::info!("Child exited; shutting down"),
        }

        cancel.cancel();
        // A child we can no longer reap must not cost the session its
        // edits: the check, repack and rescue below run regardless.
        let child_exit = stop_child(&child, config.grace_period());
        if child.was_killed() {
            journal.record(SessionEvent::ForcedKill, format!("pid {}", child.pid()));
        }
        match child_exit {
            Some(status) => journal.record(SessionEvent::ChildExited, status.to_string()),
            None => journal.record(SessionEvent::ChildExited, "exit status unknown"),
        }

        join_background("exit waiter", waiter_thread);
        join_background("watcher", watch_thread);

        // Edits made after the last tick are still picked up.
        let mutated = watcher.check_now();

        let coordinator = RepackCoordinator::new(image, config.output.clone());
        let repack = if mutated {
            if !mutation_recorded {
                journal.record_path(SessionEvent::MutationDetected, "modified before exit", &paths.project_store);
            }
            repack_store(&coordinator, &table, &paths, &mut journal)
        } else {
            journal.record(SessionEvent::RepackSkipped, "store unchanged");
            RepackOutcome::Unchanged
        };

        let retain = matches!(
            repack,
            RepackOutcome::Failed {
                workspace_retained: true,
                ..
            }
        );
        if retain {
            let root = workspace.retain();
            journal.record_path(SessionEvent::WorkspaceRetained, "store kept in workspace", &root);
        } else {
            workspace.destroy();
            journal.record(SessionEvent::CleanupComplete, "workspace removed");
        }

        let seen = shutdown.requests();
        let ignored_requests = match trigger {
            ShutdownTrigger::Requested { .. } => seen.saturating_sub(1),
            ShutdownTrigger::ChildExited => seen.saturating_sub(handled_requests),
        };
        if ignored_requests > 0 {
            log::info!("Ignored {} repeated termination request(s)", ignored_requests);
        }

        journal.record(SessionEvent::SessionEnd, "done");
        Ok(SessionOutcome {
            child_exit,
            trigger,
            repack,
            ignored_requests,
            journal,
        })
    }
}

fn launch_spec(
    table: &ResourceTable,
    paths: &ExtractedPaths,
    cwd: &std::path::Path,
    port: u16,
) -> Result<LaunchSpec> {
    let profile = table.profile();
    let env = EnvOverlay::for_runtime(
        &paths.runtime_binary,
        &profile.dependency_env_var,
        &paths.dependency_dir,
        std::env::var_os("PATH"),
    )?;
    Ok(LaunchSpec::new(&paths.runtime_binary, cwd)
        .arg(&paths.server_script)
        .arg(&paths.project_store)
        .arg(port.to_string())
        .env(env))
}

fn stop_child(child: &ChildProcess, grace: Duration) -> Option<ExitStatus> {
    match child.cancel(grace) {
        Ok(status) => {
            log::info!("Child {} finished: {}", child.pid(), status);
            Some(status)
        }
        Err(e) => {
            log::error!("Could not reap child {}: {}", child.pid(), e);
            None
        }
    }
}

fn join_background(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::warn!("Background {} thread panicked", name);
    }
}

fn repack_store(
    coordinator: &RepackCoordinator,
    table: &ResourceTable,
    paths: &ExtractedPaths,
    journal: &mut SessionJournal,
) -> RepackOutcome {
    match coordinator.repack(table, &paths.project_store) {
        Ok(written) => {
            log::info!("Wrote updated artifact {}", written.display());
            journal.record_path(SessionEvent::RepackWritten, "artifact written", &written);
            RepackOutcome::Written(written)
        }
        Err(error) => {
            log::error!("Repack failed: {}", error);
            journal.record_path(SessionEvent::RepackFailed, error.to_string(), coordinator.output());
            match coordinator.rescue_store(&paths.project_store) {
                Some(rescued) => {
                    journal.record_path(SessionEvent::StoreRescued, "raw store copied", &rescued);
                    RepackOutcome::Failed {
                        error,
                        store_at: rescued,
                        workspace_retained: false,
                    }
                }
                None => RepackOutcome::Failed {
                    error,
                    store_at: paths.project_store.clone(),
                    workspace_retained: true,
                },
            }
        }
    }
}
