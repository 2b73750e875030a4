//! Observability
//!
//! Structured session journal for operational visibility.

pub mod journal;

pub use journal::{SessionEvent, SessionJournal};
