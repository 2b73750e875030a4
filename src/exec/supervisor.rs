/// Child process supervision
/// Launches the runtime with inherited output streams, reaps it, and
/// cancels it in two stages: SIGTERM to its process group, then SIGKILL
/// once the grace period runs out.
use crate::config::types::{LaunchError, Result};
use crate::exec::environment::EnvOverlay;
use crossbeam_channel::{bounded, Receiver};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Attempts made when exec races with the file that was just written
const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);
const REAP_POLL: Duration = Duration::from_millis(25);

/// Everything needed to start the child
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: EnvOverlay,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: EnvOverlay::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, env: EnvOverlay) -> Self {
        self.env = env;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Own process group: terminal interrupts reach the launcher only and
        // cancellation can address the whole tree the runtime spawns.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

/// Start the child described by `spec`
pub fn launch(spec: &LaunchSpec) -> Result<ChildProcess> {
    let mut attempt = 1;
    let child = loop {
        match spec.command().spawn() {
            Ok(child) => break child,
            Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                log::debug!(
                    "{} busy after extraction, retrying spawn ({}/{})",
                    spec.program.display(),
                    attempt,
                    SPAWN_ATTEMPTS
                );
                thread::sleep(SPAWN_RETRY_DELAY * attempt);
                attempt += 1;
            }
            Err(source) => {
                return Err(LaunchError::LaunchFailed {
                    path: spec.program.clone(),
                    source,
                })
            }
        }
    };

    log::info!("Started {} (pid {})", spec.program.display(), child.id());
    Ok(ChildProcess {
        inner: Arc::new(ChildState {
            pid: child.id(),
            program: spec.program.clone(),
            child: Mutex::new(child),
            status: Mutex::new(None),
            killed: AtomicBool::new(false),
        }),
    })
}

#[cfg(unix)]
fn is_text_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &io::Error) -> bool {
    false
}

struct ChildState {
    pid: u32,
    program: PathBuf,
    child: Mutex<Child>,
    status: Mutex<Option<ExitStatus>>,
    killed: AtomicBool,
}

/// Shared handle to the running child
#[derive(Clone)]
pub struct ChildProcess {
    inner: Arc<ChildState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn program(&self) -> &Path {
        &self.inner.program
    }

    /// Whether cancellation had to escalate to SIGKILL
    pub fn was_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    /// Exit status if the child has been reaped
    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        let mut status = lock(&self.inner.status);
        if status.is_none() {
            *status = lock(&self.inner.child).try_wait()?;
        }
        Ok(*status)
    }

    /// Stop the child: SIGTERM to its group, wait up to `grace`, then
    /// SIGKILL. Once the child has been reaped, later calls return the
    /// recorded status without sending anything.
    pub fn cancel(&self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }

        log::info!("Stopping child (pid {})", self.pid());
        self.terminate();

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            thread::sleep(REAP_POLL);
        }

        log::warn!(
            "Child (pid {}) ignored SIGTERM for {:?}; killing",
            self.pid(),
            grace
        );
        self.inner.killed.store(true, Ordering::SeqCst);
        self.kill();

        let mut status = lock(&self.inner.status);
        if let Some(existing) = *status {
            return Ok(existing);
        }
        let reaped = lock(&self.inner.child).wait()?;
        *status = Some(reaped);
        Ok(reaped)
    }

    #[cfg(unix)]
    fn terminate(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn kill(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;
        match killpg(Pid::from_raw(self.pid() as i32), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to send {} to group {}: {}", signal, self.pid(), e),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {
        // No graceful stop is available; the grace period still lets a
        // child that is already exiting finish on its own.
    }

    #[cfg(not(unix))]
    fn kill(&self) {
        if let Err(e) = lock(&self.inner.child).kill() {
            log::warn!("Failed to kill child {}: {}", self.pid(), e);
        }
    }

    /// Background thread that reports the child's exit on the returned
    /// channel. It ends once the child has been reaped by anyone.
    pub fn spawn_exit_waiter(&self, poll: Duration) -> io::Result<(JoinHandle<()>, Receiver<ExitStatus>)> {
        let (tx, rx) = bounded(1);
        let child = self.clone();
        let handle = thread::Builder::new()
            .name("devcapsule-exit-waiter".to_string())
            .spawn(move || loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let _ = tx.send(status);
                        return;
                    }
                    Ok(None) => thread::sleep(poll),
                    Err(e) => {
                        log::warn!("Lost track of child {}: {}", child.pid(), e);
                        return;
                    }
                }
            })?;
        Ok((handle, rx))
    }
}
