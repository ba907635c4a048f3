//! Tests for TransferOrchestrator over the in-memory share and temp folders.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreSettings;
use crate::error::CoreError;
use crate::local::media_index::FsMediaIndex;
use crate::model::{ConnectionDescriptor, SortDestination, TransferOutcome};
use crate::network::in_memory::InMemoryShare;
use crate::orchestrator::{Direction, TransferOrchestrator};

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

type Orchestrator = TransferOrchestrator<InMemoryShare, FsMediaIndex>;

// ============================================================================
// Test utilities
// ============================================================================

fn fixture() -> InMemoryShare {
    let share = InMemoryShare::new();
    share
        .add_file("smb://nas/Photos/inbox/a.jpg", JPEG)
        .add_file("smb://nas/Photos/inbox/b.jpg", JPEG)
        .add_file("smb://nas/Photos/inbox/c.png", PNG)
        .add_dir("smb://nas/Photos/sorted");
    share
}

fn inbox() -> ConnectionDescriptor {
    ConnectionDescriptor::remote(1, "nas", "Photos/inbox", None)
}

fn sorted(rank: u8) -> SortDestination {
    SortDestination::new(ConnectionDescriptor::remote(2, "nas", "Photos/sorted", None), "Sorted", rank)
}

async fn browsing(share: &InMemoryShare) -> Orchestrator {
    let orchestrator = TransferOrchestrator::new(share.clone(), FsMediaIndex::new(), CoreSettings::default());
    orchestrator.connect(inbox()).await.unwrap();
    orchestrator.refresh_listing().await.unwrap();
    orchestrator
}

async fn current_name(orchestrator: &Orchestrator) -> Option<String> {
    orchestrator.current().await.map(|f| f.name)
}

async fn wait_for_preload(orchestrator: &Orchestrator, index: usize) -> bool {
    for _ in 0..100 {
        if orchestrator.preloaded_index() == Some(index) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Connect and listing
// ============================================================================

#[tokio::test]
async fn test_connect_failure_is_connection_failure() {
    let share = fixture();
    share.set_unreachable("nas", true);
    let orchestrator = Orchestrator::new(share, FsMediaIndex::new(), CoreSettings::default());
    assert!(matches!(
        orchestrator.connect(inbox()).await,
        Err(CoreError::ConnectionFailure { .. })
    ));
}

#[tokio::test]
async fn test_refresh_without_source() {
    let orchestrator = Orchestrator::new(fixture(), FsMediaIndex::new(), CoreSettings::default());
    assert!(matches!(
        orchestrator.refresh_listing().await,
        Err(CoreError::ConnectionFailure { .. })
    ));
}

#[tokio::test]
async fn test_listing_error_surfaces_as_unknown_error() {
    let share = fixture();
    let orchestrator = Orchestrator::new(share, FsMediaIndex::new(), CoreSettings::default());
    orchestrator
        .connect(ConnectionDescriptor::remote(1, "nas", "Photos/missing", None))
        .await
        .unwrap();
    assert!(matches!(
        orchestrator.refresh_listing().await,
        Err(CoreError::UnknownError { .. })
    ));
}

#[tokio::test]
async fn test_invalid_descriptor_is_rejected() {
    let orchestrator = Orchestrator::new(fixture(), FsMediaIndex::new(), CoreSettings::default());
    let result = orchestrator
        .connect(ConnectionDescriptor::remote(1, "", "Photos", None))
        .await;
    assert!(matches!(result, Err(CoreError::UnknownError { .. })));
    assert_eq!(orchestrator.active_descriptor().await, None);
}

// ============================================================================
// Navigation
// ============================================================================

#[tokio::test]
async fn test_advance_wraps_both_ends() {
    let orchestrator = browsing(&fixture()).await;
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("a.jpg"));

    assert_eq!(orchestrator.advance(Direction::Previous).await.map(|f| f.name).as_deref(), Some("c.png"));
    assert_eq!(orchestrator.current_index().await, Some(2));
    assert_eq!(orchestrator.advance(Direction::Next).await.map(|f| f.name).as_deref(), Some("a.jpg"));
    assert_eq!(orchestrator.current_index().await, Some(0));
}

#[tokio::test]
async fn test_advance_on_empty_listing_is_noop() {
    let share = InMemoryShare::new();
    share.add_dir("smb://nas/Photos/inbox");
    let orchestrator = browsing(&share).await;

    assert_eq!(orchestrator.advance(Direction::Next).await, None);
    assert_eq!(orchestrator.advance(Direction::Previous).await, None);
    assert_eq!(orchestrator.current_index().await, None);
    assert!(matches!(orchestrator.load_current().await, Err(CoreError::EmptyListing)));
}

// ============================================================================
// Loading and preloading
// ============================================================================

#[tokio::test]
async fn test_load_then_preload_hit() {
    let orchestrator = browsing(&fixture()).await;

    let first = orchestrator.load_current().await.unwrap();
    assert_eq!(first.file.name, "a.jpg");
    assert_eq!(first.bytes, JPEG);
    assert!(!first.from_preload);

    assert!(wait_for_preload(&orchestrator, 1).await);
    orchestrator.advance(Direction::Next).await;
    let second = orchestrator.load_current().await.unwrap();
    assert_eq!(second.file.name, "b.jpg");
    assert!(second.from_preload);

    // The following file is preloaded after a hit too
    assert!(wait_for_preload(&orchestrator, 2).await);
}

#[tokio::test]
async fn test_preload_for_other_index_is_a_miss() {
    let orchestrator = browsing(&fixture()).await;
    orchestrator.load_current().await.unwrap();
    assert!(wait_for_preload(&orchestrator, 1).await);

    orchestrator.advance(Direction::Previous).await;
    let loaded = orchestrator.load_current().await.unwrap();
    assert_eq!(loaded.file.name, "c.png");
    assert!(!loaded.from_preload);
}

#[tokio::test]
async fn test_advance_aborts_unfinished_preload() {
    let share = fixture();
    let orchestrator = browsing(&share).await;
    share.set_read_delay(Duration::from_millis(150));

    orchestrator.load_current().await.unwrap();
    orchestrator.advance(Direction::Next).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.preloaded_index(), None);
}

#[tokio::test]
async fn test_corrupt_file_fails_validation() {
    let share = InMemoryShare::new();
    share
        .add_file("smb://nas/Photos/inbox/broken.png", b"not a png at all")
        .add_file("smb://nas/Photos/inbox/fine.jpg", JPEG);
    let orchestrator = browsing(&share).await;

    match orchestrator.load_current().await {
        Err(CoreError::ValidationFailure { result }) => assert!(!result.is_valid),
        other => panic!("expected a validation failure, got {:?}", other),
    }
    // The next file still gets preloaded
    assert!(wait_for_preload(&orchestrator, 1).await);
}

#[tokio::test]
async fn test_load_missing_file_is_not_found() {
    let share = fixture();
    let orchestrator = browsing(&share).await;
    orchestrator
        .remote_client()
        .delete_file("smb://nas/Photos/inbox/a.jpg")
        .await;

    assert!(matches!(
        orchestrator.load_current().await,
        Err(CoreError::NotFound { .. })
    ));
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn test_copy_advances_cursor_and_never_overwrites() {
    let share = fixture();
    let orchestrator = browsing(&share).await;

    assert_eq!(orchestrator.copy_current_to(&sorted(0)).await, Ok(TransferOutcome::Success));
    assert!(share.contains("smb://nas/Photos/sorted/a.jpg"));
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("b.jpg"));
    assert_eq!(orchestrator.listing().await.len(), 3);

    orchestrator.advance(Direction::Previous).await;
    assert_eq!(
        orchestrator.copy_current_to(&sorted(0)).await,
        Err(CoreError::AlreadyExists { name: "a.jpg".into() })
    );
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("a.jpg"));
}

#[tokio::test]
async fn test_copy_to_same_folder() {
    let orchestrator = browsing(&fixture()).await;
    let same = SortDestination::new(inbox(), "Inbox", 0);
    assert!(matches!(
        orchestrator.copy_current_to(&same).await,
        Err(CoreError::SameLocation { .. })
    ));
}

#[tokio::test]
async fn test_move_removes_entry_and_clamps() {
    let share = fixture();
    let orchestrator = browsing(&share).await;
    orchestrator.advance(Direction::Previous).await;

    assert_eq!(orchestrator.move_current_to(&sorted(0)).await, Ok(TransferOutcome::Success));
    assert!(share.contains("smb://nas/Photos/sorted/c.png"));
    assert!(!share.contains("smb://nas/Photos/inbox/c.png"));
    assert_eq!(orchestrator.listing().await.len(), 2);
    assert_eq!(orchestrator.current_index().await, Some(1));
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("b.jpg"));
}

#[tokio::test]
async fn test_move_with_failed_delete_keeps_both() {
    let share = fixture();
    share.fail_delete("smb://nas/Photos/inbox/a.jpg");
    let orchestrator = browsing(&share).await;

    assert!(matches!(
        orchestrator.move_current_to(&sorted(0)).await,
        Err(CoreError::DeleteError { .. })
    ));
    assert!(share.contains("smb://nas/Photos/sorted/a.jpg"));
    assert!(share.contains("smb://nas/Photos/inbox/a.jpg"));
    assert_eq!(orchestrator.listing().await.len(), 3);
}

#[tokio::test]
async fn test_delete_until_empty() {
    let share = InMemoryShare::new();
    share
        .add_file("smb://nas/Photos/inbox/a.jpg", JPEG)
        .add_file("smb://nas/Photos/inbox/b.jpg", JPEG);
    let orchestrator = browsing(&share).await;

    assert_eq!(orchestrator.delete_current().await, Ok(TransferOutcome::Success));
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("b.jpg"));
    assert_eq!(orchestrator.delete_current().await, Ok(TransferOutcome::Success));

    assert_eq!(orchestrator.current().await, None);
    assert_eq!(orchestrator.advance(Direction::Next).await, None);
    assert!(matches!(orchestrator.delete_current().await, Err(CoreError::EmptyListing)));
}

#[tokio::test]
async fn test_local_destination_rejected() {
    let share = fixture();
    let orchestrator = browsing(&share).await;
    let local = SortDestination::new(ConnectionDescriptor::standard_bucket("Pictures"), "Phone", 0);

    assert!(matches!(
        orchestrator.copy_current_to(&local).await,
        Err(CoreError::PermissionDenied { .. })
    ));
    assert!(matches!(
        orchestrator.move_current_to(&local).await,
        Err(CoreError::PermissionDenied { .. })
    ));
    assert!(share.contains("smb://nas/Photos/inbox/a.jpg"));
}

#[tokio::test]
async fn test_cancel_stops_running_copy() {
    let share = fixture();
    let orchestrator = Arc::new(browsing(&share).await);
    share.set_read_delay(Duration::from_millis(200));

    let o = orchestrator.clone();
    let copy = tokio::spawn(async move { o.copy_current_to(&sorted(0)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.cancel();

    let result = copy.await.unwrap();
    assert_eq!(result, Err(CoreError::Cancelled));
    assert!(result.unwrap_err().is_silent());
    assert!(!share.contains("smb://nas/Photos/sorted/a.jpg"));

    // A fresh token serves later work
    assert_eq!(orchestrator.copy_current_to(&sorted(0)).await, Ok(TransferOutcome::Success));
}

// ============================================================================
// Destination eligibility
// ============================================================================

#[tokio::test]
async fn test_eligible_destinations_gate() {
    let share = fixture();
    let mut destinations = Vec::new();
    for i in 0..12u8 {
        let dir = format!("Sorted/d{}", i);
        share.add_dir(&format!("smb://nas/{}", dir));
        destinations.push(SortDestination::new(
            ConnectionDescriptor::remote(100 + i as i64, "nas", dir, None),
            format!("d{}", i),
            i,
        ));
    }
    share.set_read_only("smb://nas/Sorted/d1");
    destinations.push(SortDestination::new(ConnectionDescriptor::standard_bucket("Pictures"), "Phone", 12));
    destinations.reverse();

    let orchestrator = browsing(&share).await;
    let eligible = orchestrator.eligible_destinations(&destinations).await;

    let labels: Vec<_> = eligible.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["d0", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10"]);
}

// ============================================================================
// Local sources
// ============================================================================

#[tokio::test]
async fn test_local_folder_browse_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.jpg"), JPEG).unwrap();
    std::fs::write(dir.path().join("b.png"), PNG).unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

    let orchestrator = Orchestrator::new(InMemoryShare::new(), FsMediaIndex::new(), CoreSettings::default());
    orchestrator
        .connect(ConnectionDescriptor::custom_directory(5, dir.path()))
        .await
        .unwrap();
    let listing = orchestrator.refresh_listing().await.unwrap();
    assert_eq!(listing.files.len(), 2);

    let loaded = orchestrator.load_current().await.unwrap();
    assert_eq!(loaded.file.name, "a.jpg");

    assert_eq!(orchestrator.delete_current().await, Ok(TransferOutcome::Success));
    assert!(!dir.path().join("a.jpg").exists());
    assert_eq!(current_name(&orchestrator).await.as_deref(), Some("b.png"));

    assert!(matches!(
        orchestrator.copy_current_to(&sorted(0)).await,
        Err(CoreError::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn test_pending_delete_keeps_entry_until_forgotten() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.jpg"), JPEG).unwrap();
    std::fs::write(dir.path().join("b.jpg"), JPEG).unwrap();
    let index = FsMediaIndex::new().with_bucket("Camera", dir.path()).confirm_deletes(true);

    let orchestrator = Orchestrator::new(InMemoryShare::new(), index, CoreSettings::default());
    orchestrator
        .connect(ConnectionDescriptor::standard_bucket("Camera"))
        .await
        .unwrap();
    orchestrator.refresh_listing().await.unwrap();
    let broker = orchestrator.local_client().confirmations().clone();
    let mut resolutions = broker.subscribe_resolutions();

    let Ok(TransferOutcome::PendingConfirmation(token)) = orchestrator.delete_current().await else {
        panic!("expected a pending confirmation");
    };
    assert_eq!(orchestrator.listing().await.len(), 2);

    broker.resolve(token, true);
    let resolution = tokio::time::timeout(Duration::from_secs(1), resolutions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolution.outcome, TransferOutcome::Success);
    assert!(orchestrator.forget_entry(&resolution.locator).await);
    assert_eq!(orchestrator.listing().await.len(), 1);
    assert!(!orchestrator.forget_entry(&resolution.locator).await);
}

// ============================================================================
// Listing while other calls run
// ============================================================================

/// A custom folder of `count` JPEGs, scanned one entry per batch.
async fn scanning(dir: &std::path::Path, count: usize) -> Orchestrator {
    for i in 0..count {
        std::fs::write(dir.join(format!("img{:02}.jpg", i)), JPEG).unwrap();
    }
    let settings = CoreSettings {
        scan_batch_size: 1,
        ..CoreSettings::default()
    };
    let orchestrator = Orchestrator::new(InMemoryShare::new(), FsMediaIndex::new(), settings);
    orchestrator
        .connect(ConnectionDescriptor::custom_directory(5, dir))
        .await
        .unwrap();
    orchestrator
}

#[tokio::test]
async fn test_cancel_stops_local_scan() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = scanning(dir.path(), 20).await;

    let (scan, ()) = tokio::join!(orchestrator.refresh_listing(), async { orchestrator.cancel() });

    assert!(matches!(scan, Err(CoreError::Cancelled)), "got {:?}", scan);
    assert!(orchestrator.listing().await.is_empty());
    assert_eq!(orchestrator.refresh_listing().await.unwrap().files.len(), 20);
}

#[tokio::test]
async fn test_state_is_free_while_listing() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = scanning(dir.path(), 20).await;

    let (scan, (was_free, index)) = tokio::join!(orchestrator.refresh_listing(), async {
        let was_free = !orchestrator.state_is_locked();
        (was_free, orchestrator.current_index().await)
    });

    assert!(was_free);
    assert_eq!(index, None);
    assert_eq!(scan.unwrap().files.len(), 20);
    assert_eq!(orchestrator.current_index().await, Some(0));
}

#[tokio::test]
async fn test_listing_for_replaced_source_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    let orchestrator = scanning(dir.path(), 20).await;

    let (scan, switched) = tokio::join!(
        orchestrator.refresh_listing(),
        orchestrator.connect(ConnectionDescriptor::custom_directory(6, other.path()))
    );

    switched.unwrap();
    assert!(matches!(scan, Err(CoreError::Cancelled)), "got {:?}", scan);
    assert!(orchestrator.listing().await.is_empty());
    assert_eq!(
        orchestrator.active_descriptor().await,
        Some(ConnectionDescriptor::custom_directory(6, other.path()))
    );
}
