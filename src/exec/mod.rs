//! Execution control
//!
//! Builds the child's environment and supervises the runtime process.

pub mod environment;
pub mod supervisor;

pub use environment::EnvOverlay;
pub use supervisor::{launch, ChildProcess, LaunchSpec};
