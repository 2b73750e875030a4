/// Session-wide cancellation
/// The token side is a receiver on a channel nobody ever sends on;
/// dropping the only sender disconnects it, which wakes every clone at once.
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Triggers cancellation; held by the lifecycle loop
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
    cancelled: Arc<AtomicBool>,
}

/// Observes cancellation; cloned into background tasks
#[derive(Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
    cancelled: Arc<AtomicBool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded(0);
    let cancelled = Arc::new(AtomicBool::new(false));
    (
        CancelHandle {
            sender: Mutex::new(Some(tx)),
            cancelled: Arc::clone(&cancelled),
        },
        CancelToken {
            receiver: rx,
            cancelled,
        },
    )
}

impl CancelHandle {
    /// Cancel every token. Returns `true` only for the call that actually
    /// triggered it.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sender.take();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) on cancellation, for
    /// use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// Block up to `timeout`; `true` if cancelled in the meantime
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}
