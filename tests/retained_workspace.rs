//! When neither the new artifact nor any rescue copy can be written, the
//! workspace holding the edited store is kept.
//!
//! Lives in its own test binary because it points `TMPDIR` somewhere
//! unusable for the whole process.
#![cfg(unix)]

mod common;

use common::Fixture;
use devcapsule::config::types::LaunchError;
use devcapsule::kernel::signal::ManualShutdown;
use devcapsule::observability::journal::SessionEvent;
use devcapsule::session::RepackOutcome;
use std::fs;

const EDITING_RUNTIME: &str = "#!/bin/sh\nprintf 'edited' > \"$2\"\n";

#[test]
fn test_workspace_retained_when_no_rescue_location_works() {
    let fixture = Fixture::new(EDITING_RUNTIME);
    let mut config = fixture.config();
    config.output = Some(fixture.path("no-such-dir/app.out"));

    // Block both rescue locations: a directory squats on the copy next to
    // the artifact, and the temp dir does not exist.
    fs::create_dir(fixture.path("app.updated.db")).unwrap();
    std::env::set_var("TMPDIR", fixture.path("no-such-tmp"));

    let outcome = fixture.launcher(config).run(&ManualShutdown::new()).unwrap();

    let workspaces = fixture.workspaces();
    assert_eq!(workspaces.len(), 1);
    match &outcome.repack {
        RepackOutcome::Failed {
            error,
            store_at,
            workspace_retained,
        } => {
            assert!(matches!(error, LaunchError::RepackFailed { .. }));
            assert!(workspace_retained);
            assert!(store_at.starts_with(&workspaces[0]), "{}", store_at.display());
            assert_eq!(fs::read(store_at).unwrap(), b"edited");
        }
        other => panic!("expected a failed repack, got {:?}", other),
    }
    assert!(outcome.journal.contains(SessionEvent::WorkspaceRetained));
    assert!(!outcome.journal.contains(SessionEvent::CleanupComplete));
    assert!(!outcome.journal.contains(SessionEvent::StoreRescued));
}
