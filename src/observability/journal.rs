/// Session journal
/// Structured record of one launch: every lifecycle step becomes an event
/// that is logged as a JSON line under the `devcapsule::journal` target and
/// kept for the session outcome.
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

pub const JOURNAL_TARGET: &str = "devcapsule::journal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Lifecycle events worth recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionStart,
    PlatformSelected,
    WorkspaceCreated,
    ResourcesExtracted,
    ChildStarted,
    ShutdownRequested,
    ChildExited,
    ForcedKill,
    MutationDetected,
    RepackSkipped,
    RepackWritten,
    RepackFailed,
    StoreRescued,
    WorkspaceRetained,
    CleanupComplete,
    SessionEnd,
}

impl SessionEvent {
    pub fn default_severity(&self) -> Severity {
        match self {
            SessionEvent::ForcedKill | SessionEvent::StoreRescued | SessionEvent::WorkspaceRetained => {
                Severity::Warning
            }
            SessionEvent::RepackFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event: SessionEvent,
    pub severity: Severity,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Ordered events for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionJournal {
    session_id: String,
    entries: Vec<JournalEntry>,
}

impl SessionJournal {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sessions are named after their workspace once it exists
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
    }

    pub fn record(&mut self, event: SessionEvent, details: impl Into<String>) {
        self.push(event, details.into(), None);
    }

    pub fn record_path(&mut self, event: SessionEvent, details: impl Into<String>, path: &std::path::Path) {
        self.push(event, details.into(), Some(path.display().to_string()));
    }

    fn push(&mut self, event: SessionEvent, details: String, path: Option<String>) {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            event,
            severity: event.default_severity(),
            details,
            path,
        };

        match serde_json::to_string(&entry) {
            Ok(line) => match entry.severity {
                Severity::Info => info!(target: JOURNAL_TARGET, "{}", line),
                Severity::Warning => warn!(target: JOURNAL_TARGET, "{}", line),
                Severity::Error => error!(target: JOURNAL_TARGET, "{}", line),
            },
            Err(e) => error!(target: JOURNAL_TARGET, "Failed to encode journal entry: {}", e),
        }

        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Number of times `event` was recorded
    pub fn count(&self, event: SessionEvent) -> usize {
        self.entries.iter().filter(|e| e.event == event).count()
    }

    pub fn contains(&self, event: SessionEvent) -> bool {
        self.count(event) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_ordered_and_counted() {
        let mut journal = SessionJournal::new("pending");
        journal.record(SessionEvent::SessionStart, "start");
        journal.set_session_id("abc");
        journal.record_path(SessionEvent::WorkspaceCreated, "created", std::path::Path::new("/tmp/ws"));
        journal.record(SessionEvent::RepackFailed, "disk full");

        let events: Vec<_> = journal.entries().iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::SessionStart,
                SessionEvent::WorkspaceCreated,
                SessionEvent::RepackFailed
            ]
        );
        assert_eq!(journal.entries()[0].session_id, "pending");
        assert_eq!(journal.entries()[1].session_id, "abc");
        assert_eq!(journal.entries()[1].path.as_deref(), Some("/tmp/ws"));
        assert_eq!(journal.entries()[2].severity, Severity::Error);
        assert_eq!(journal.count(SessionEvent::SessionStart), 1);
        assert!(!journal.contains(SessionEvent::ForcedKill));
    }

    #[test]
    fn test_entry_serializes_as_json_line() {
        let mut journal = SessionJournal::new("s1");
        journal.record(SessionEvent::ChildStarted, "pid 42");
        let line = serde_json::to_string(&journal.entries()[0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "ChildStarted");
        assert_eq!(value["session_id"], "s1");
        assert!(value.get("path").is_none());
    }
}
