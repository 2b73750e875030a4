//! Process-level kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod signal;

pub use signal::{ManualShutdown, ShutdownSource, SignalHandler};
