//! Session lifecycle
//!
//! Cancellation, store watching, and repacking, driven by the `Launcher`.

pub mod cancel;
pub mod lifecycle;
pub mod repack;
pub mod watcher;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use lifecycle::{Launcher, SessionOutcome, ShutdownTrigger};
pub use repack::{RepackCoordinator, RepackOutcome};
pub use watcher::{fingerprint_file, Fingerprint, MutationFlag, PollingWatcher, StoreWatch};
