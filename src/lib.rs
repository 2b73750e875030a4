//! devcapsule: a self-contained development environment launcher
//! One executable carries a language runtime per platform, the dependency
//! tree, a dev server script, and the project's state store. Running it
//! extracts what the host needs into a private workspace, serves until
//! interrupted, and writes a new artifact if the project changed.
//!
//! # Architecture
//!
//! ## Resources ([`resources`])
//! - [`resources::table`]: Immutable resource table keyed by kind and platform
//! - [`resources::artifact`]: Artifact layout (launcher image, payload, index, trailer)
//!
//! ## Archive Codec ([`archive`])
//! - [`archive::decode`]: Streaming gzip/tar decoding and confined extraction
//! - [`archive::encode`]: Deterministic encoding of a dependency tree
//! - [`archive::entry`]: Entry model and path normalization
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::workspace`]: Session-scoped workspace and resource extraction
//! - [`safety::safe_cleanup`]: Symlink-safe, single-filesystem tree removal
//!
//! ## Execution Control ([`exec`])
//! - [`exec::supervisor`]: Child launch, exit waiting, two-stage cancellation
//! - [`exec::environment`]: Child-only environment overlay
//!
//! ## Session ([`session`])
//! - [`session::lifecycle`]: The launch-serve-repack flow
//! - [`session::watcher`]: Store fingerprinting and the monotonic mutation flag
//! - [`session::repack`]: New-artifact writing and store rescue
//! - [`session::cancel`]: Broadcast cancellation token
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: Async-safe termination signal handling
//!
//! ## Observability ([`observability`])
//! - [`observability::journal`]: Structured session journal
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Platforms, resource kinds, and the error taxonomy
//! - [`config::launcher`]: Launch profile and launcher configuration
//!
//! # Design Principles
//!
//! 1. **The running artifact is read-only** - repack always writes a new file
//! 2. **Select before writing** - an unsupported host never touches disk
//! 3. **Confined extraction** - nothing lands outside the workspace
//! 4. **One teardown** - the lifecycle consumes itself, repeat signals are ignored

// Configuration & Types
pub mod config;

// Resources
pub mod resources;

// Archive Codec
pub mod archive;

// Safety & Cleanup
pub mod safety;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Session Lifecycle
pub mod session;

// Observability
pub mod observability;

// CLI entrypoint wiring shared by the devcapsule binaries.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use resources::{ArtifactImage, Blob, ResourceTable};
pub use session::{Launcher, RepackOutcome, SessionOutcome};
