/// Project store mutation watcher
/// Polls the store's content fingerprint and raises a flag the first time it
/// diverges. The flag never goes back down, even if the content later
/// returns to its original bytes.
use crate::session::cancel::CancelToken;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lowercase hex SHA-256 of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint_file(path: &Path) -> io::Result<Fingerprint> {
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(File::open(path)?), &mut hasher)?;
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Monotonic "store was modified" flag
#[derive(Debug, Clone, Default)]
pub struct MutationFlag(Arc<AtomicBool>);

impl MutationFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call is the one that raised it
    fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// Source of store mutation events
pub trait StoreWatch: Send + Sync {
    /// Shared view of the mutation flag
    fn flag(&self) -> MutationFlag;

    /// Compare the store against the last fingerprint right now.
    /// Returns the flag state afterwards.
    fn check_now(&self) -> bool;

    /// Run the watch loop in the background until `cancel` fires
    fn start(&self, cancel: CancelToken) -> io::Result<JoinHandle<()>>;
}

struct WatchState {
    path: PathBuf,
    last: Mutex<Fingerprint>,
    flag: MutationFlag,
}

impl WatchState {
    fn check(&self) -> bool {
        match fingerprint_file(&self.path) {
            Ok(current) => {
                let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
                if *last != current {
                    if self.flag.raise() {
                        log::info!("Project store modified; the artifact will be repacked on exit");
                    }
                    log::debug!("Store fingerprint {} -> {}", last, current);
                    *last = current;
                }
            }
            // The child may be mid-replace; try again next tick.
            Err(e) => log::debug!("Skipping store check for {}: {}", self.path.display(), e),
        }
        self.flag.is_set()
    }
}

/// Interval-polling `StoreWatch`
pub struct PollingWatcher {
    state: Arc<WatchState>,
    interval: Duration,
}

impl PollingWatcher {
    /// `initial` is the fingerprint taken right after extraction
    pub fn new(path: impl Into<PathBuf>, initial: Fingerprint, interval: Duration) -> Self {
        Self {
            state: Arc::new(WatchState {
                path: path.into(),
                last: Mutex::new(initial),
                flag: MutationFlag::default(),
            }),
            interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }
}

impl StoreWatch for PollingWatcher {
    fn flag(&self) -> MutationFlag {
        self.state.flag.clone()
    }

    fn check_now(&self) -> bool {
        self.state.check()
    }

    fn start(&self, cancel: CancelToken) -> io::Result<JoinHandle<()>> {
        let state = Arc::clone(&self.state);
        let interval = self.interval;
        thread::Builder::new()
            .name("devcapsule-watcher".to_string())
            .spawn(move || {
                log::debug!("Watching {} every {:?}", state.path.display(), interval);
                while !cancel.wait_timeout(interval) {
                    state.check();
                }
                log::debug!("Watcher stopped");
            })
    }
}
