/// Async-safe termination handling
/// Handlers only touch atomics; the lifecycle loop polls them and performs
/// the actual shutdown. Every delivery is counted so repeats can be logged,
/// but only the first one starts a shutdown.
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Something the lifecycle loop can ask whether it should stop
pub trait ShutdownSource: Send + Sync {
    fn shutdown_requested(&self) -> bool {
        self.requests() > 0
    }

    /// How many termination requests have arrived so far
    fn requests(&self) -> u32;

    /// Signal number of the most recent request, if it came from a signal
    fn last_signal(&self) -> Option<i32> {
        None
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Process-wide SIGINT/SIGTERM/SIGHUP handling
pub struct SignalHandler;

impl SignalHandler {
    /// Install the handlers.
    /// Must be called before the child or any background thread starts.
    #[cfg(unix)]
    pub fn init() -> std::io::Result<Self> {
        use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            // SAFETY: the handler only stores to atomics.
            unsafe { signal::sigaction(sig, &action) }.map_err(std::io::Error::from)?;
        }

        log::debug!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    #[cfg(not(unix))]
    pub fn init() -> std::io::Result<Self> {
        Ok(Self)
    }

    /// Only atomic operations: no allocation, no locks, no I/O
    #[cfg(unix)]
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
        SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }
}

impl ShutdownSource for SignalHandler {
    fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    fn requests(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::SeqCst)
    }

    fn last_signal(&self) -> Option<i32> {
        match SIGNAL_RECEIVED.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

/// Shutdown requests raised from code, for embedding and tests
#[derive(Debug, Default)]
pub struct ManualShutdown {
    count: AtomicU32,
}

impl ManualShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

impl ShutdownSource for ManualShutdown {
    fn requests(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl<T: ShutdownSource + ?Sized> ShutdownSource for std::sync::Arc<T> {
    fn shutdown_requested(&self) -> bool {
        (**self).shutdown_requested()
    }

    fn requests(&self) -> u32 {
        (**self).requests()
    }

    fn last_signal(&self) -> Option<i32> {
        (**self).last_signal()
    }
}
