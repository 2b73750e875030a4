//! Configuration
//!
//! Launcher settings, platform triples, and the error taxonomy.

pub mod launcher;
pub mod types;
