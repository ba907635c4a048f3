//! Tests for RemoteShareClient against the in-memory share.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::in_memory::InMemoryShare;
use super::share_path::SharePath;
use super::smb_client::{RemoteShareClient, ShareTarget};
use super::transport::{ShareSession, ShareTransport};
use crate::config::{CoreSettings, DialectRange};
use crate::model::{Credentials, ListingResult, TransferOutcome};

const MB: u64 = 1024 * 1024;
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

// ============================================================================
// Test utilities
// ============================================================================

fn fixture() -> InMemoryShare {
    let share = InMemoryShare::new();
    share
        .add_file("smb://nas/Photos/inbox/a.jpg", JPEG)
        .add_file_with_size("smb://nas/Photos/inbox/b.mp4", 5 * MB)
        .add_file_with_size("smb://nas/Photos/inbox/c.avi", 1)
        .add_file("smb://nas/Photos/inbox/notes.txt", b"hello")
        .add_dir("smb://nas/Photos/inbox/nested")
        .add_dir("smb://nas/Photos/sorted");
    share
}

async fn connected(share: &InMemoryShare) -> RemoteShareClient<InMemoryShare> {
    let client = RemoteShareClient::new(share.clone(), CoreSettings::default());
    assert!(client.connect("nas", "", "").await);
    client
}

fn names(result: &ListingResult) -> Vec<&str> {
    result.files.iter().map(|f| f.name.as_str()).collect()
}

fn sorted_target() -> ShareTarget {
    ShareTarget::new("nas", "Photos/sorted")
}

fn with_operation_timeout(share: &InMemoryShare, ms: u64) -> RemoteShareClient<InMemoryShare> {
    let settings = CoreSettings {
        operation_timeout_ms: ms,
        ..CoreSettings::default()
    };
    RemoteShareClient::new(share.clone(), settings)
}

fn add_big_file(share: &InMemoryShare, locator: &str, mb: u64) {
    let bytes: Vec<u8> = (0..mb * MB).map(|i| (i % 251) as u8).collect();
    share.add_file(locator, &bytes);
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_returns_false_when_unreachable() {
    let share = fixture();
    share.set_unreachable("nas", true);
    let client = RemoteShareClient::new(share, CoreSettings::default());
    assert!(!client.connect("nas", "alice", "pw").await);
    assert!(!client.is_connected_to("nas").await);
}

#[tokio::test]
async fn test_connect_with_wrong_credentials() {
    let share = fixture();
    share.require_credentials("nas", "alice", "pw");
    let client = RemoteShareClient::new(share, CoreSettings::default());
    assert!(!client.connect("nas", "alice", "wrong").await);
    assert!(client.connect("smb://NAS/", "alice", "pw").await);
    assert!(client.is_connected_to("nas").await);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let share = fixture();
    let client = connected(&share).await;
    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected_to("nas").await);
    assert!(client.download_file("smb://nas/Photos/inbox/a.jpg").await.is_none());
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_listing_filters_and_excludes_avi() {
    let share = fixture();
    let client = connected(&share).await;

    let result = client.list_media_files("nas", "Photos/inbox", true, 10, 100).await;

    assert!(!result.is_error());
    assert_eq!(names(&result), vec!["a.jpg", "b.mp4"]);
    assert_eq!(result.files[0].locator, "smb://nas/Photos/inbox/a.jpg");
}

#[tokio::test]
async fn test_listing_respects_video_flag_and_size() {
    let share = fixture();
    let client = connected(&share).await;

    let no_video = client.list_media_files("nas", "Photos/inbox", false, 10, 100).await;
    assert_eq!(names(&no_video), vec!["a.jpg"]);

    let small_cap = client.list_media_files("nas", "Photos/inbox", true, 4, 100).await;
    assert_eq!(names(&small_cap), vec!["a.jpg"]);
}

#[tokio::test]
async fn test_listing_truncates_with_warning() {
    let share = InMemoryShare::new();
    for i in 0..5 {
        share.add_file(&format!("smb://nas/Photos/many/img{}.png", i), b"x");
    }
    let client = connected(&share).await;

    let result = client.list_media_files("nas", "Photos/many", true, 10, 3).await;

    assert!(!result.is_error());
    assert_eq!(names(&result), vec!["img0.png", "img1.png", "img2.png"]);
    assert!(result.warning_message.is_some());
}

#[tokio::test]
async fn test_listing_missing_or_file_path_sets_error() {
    let share = fixture();
    let client = connected(&share).await;

    let missing = client.list_media_files("nas", "Photos/nope", true, 10, 100).await;
    assert!(missing.is_error());
    assert!(missing.files.is_empty());

    let file = client.list_media_files("nas", "Photos/inbox/a.jpg", true, 10, 100).await;
    assert!(file.is_error());
}

#[tokio::test]
async fn test_listing_without_session_sets_error() {
    let client = RemoteShareClient::new(fixture(), CoreSettings::default());
    let result = client.list_media_files("nas", "Photos/inbox", true, 10, 100).await;
    assert!(result.is_error());
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_download_and_file_info() {
    let share = fixture();
    let client = connected(&share).await;

    assert_eq!(
        client.download_file("smb://nas/Photos/inbox/a.jpg").await.as_deref(),
        Some(JPEG)
    );
    assert!(client.download_file("smb://nas/Photos/inbox/gone.jpg").await.is_none());

    let info = client.get_file_info("smb://nas/Photos/inbox/b.mp4").await.unwrap();
    assert_eq!(info.name, "b.mp4");
    assert_eq!(info.size_kb, 5 * 1024);
    assert!(info.modified_date.is_some());
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn test_copy_twice_is_success_then_already_exists() {
    let share = fixture();
    let client = connected(&share).await;

    let first = client.copy_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;
    let second = client.copy_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;

    assert_eq!(first, TransferOutcome::Success);
    assert_eq!(second, TransferOutcome::AlreadyExists);
    assert_eq!(share.file_contents("smb://nas/Photos/sorted/a.jpg").as_deref(), Some(JPEG));
    assert!(share.contains("smb://nas/Photos/inbox/a.jpg"));
}

#[tokio::test]
async fn test_copy_into_same_folder_is_same_location() {
    let share = fixture();
    let client = connected(&share).await;
    let before = share.connection_count();

    let outcome = client
        .copy_file("smb://nas/Photos/inbox/a.jpg", &ShareTarget::new("NAS", "photos/Inbox/"))
        .await;

    assert_eq!(outcome, TransferOutcome::SameLocation);
    assert_eq!(share.connection_count(), before, "no I/O for same-location copies");
}

#[tokio::test]
async fn test_copy_into_read_only_folder_is_security_error() {
    let share = fixture();
    share.set_read_only("smb://nas/Photos/sorted");
    let client = connected(&share).await;

    let outcome = client.copy_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;
    assert!(matches!(outcome, TransferOutcome::SecurityError(_)));
}

#[tokio::test]
async fn test_cancelled_copy_writes_nothing() {
    let share = fixture();
    let client = connected(&share).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = client
        .copy_file_with_cancel("smb://nas/Photos/inbox/a.jpg", &sorted_target(), &cancel)
        .await;

    assert_eq!(outcome, TransferOutcome::Cancelled);
    assert!(!share.contains("smb://nas/Photos/sorted/a.jpg"));
}

#[tokio::test]
async fn test_move_removes_source() {
    let share = fixture();
    let client = connected(&share).await;

    let outcome = client.move_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;

    assert_eq!(outcome, TransferOutcome::Success);
    assert!(!share.contains("smb://nas/Photos/inbox/a.jpg"));
    assert!(share.contains("smb://nas/Photos/sorted/a.jpg"));
}

#[tokio::test]
async fn test_move_with_failed_delete_keeps_copy() {
    let share = fixture();
    share.fail_delete("smb://nas/Photos/inbox/a.jpg");
    let client = connected(&share).await;

    let outcome = client.move_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;

    assert!(matches!(outcome, TransferOutcome::DeleteError(_)));
    let dest = client.list_media_files("nas", "Photos/sorted", true, 10, 100).await;
    assert_eq!(names(&dest), vec!["a.jpg"]);
    assert!(share.contains("smb://nas/Photos/inbox/a.jpg"));
}

#[tokio::test]
async fn test_write_file_never_overwrites() {
    let share = fixture();
    let client = connected(&share).await;

    assert_eq!(
        client.write_file("nas", "Photos/sorted", "new.jpg", JPEG).await,
        TransferOutcome::Success
    );
    assert_eq!(
        client.write_file("nas", "Photos/sorted", "new.jpg", b"other").await,
        TransferOutcome::AlreadyExists
    );
    assert_eq!(share.file_contents("smb://nas/Photos/sorted/new.jpg").as_deref(), Some(JPEG));
}

#[tokio::test]
async fn test_delete_file() {
    let share = fixture();
    let client = connected(&share).await;
    assert!(client.delete_file("smb://nas/Photos/inbox/a.jpg").await);
    assert!(!client.delete_file("smb://nas/Photos/inbox/a.jpg").await);
}

#[tokio::test]
async fn test_destination_session_is_reused() {
    let share = fixture();
    let client = connected(&share).await;
    let after_connect = share.connection_count();

    client.copy_file("smb://nas/Photos/inbox/a.jpg", &sorted_target()).await;
    client.write_file("nas", "Photos/sorted", "x.jpg", JPEG).await;

    assert_eq!(share.connection_count(), after_connect + 1);
}

#[tokio::test]
async fn test_destination_reconnects_after_connection_loss() {
    let share = fixture();
    let client = connected(&share).await;
    client.write_file("nas", "Photos/sorted", "x.jpg", JPEG).await;

    share.set_unreachable("nas", true);
    let lost = client.write_file("nas", "Photos/sorted", "y.jpg", JPEG).await;
    assert!(matches!(lost, TransferOutcome::NetworkError(_)));

    share.set_unreachable("nas", false);
    let count = share.connection_count();
    assert_eq!(
        client.write_file("nas", "Photos/sorted", "y.jpg", JPEG).await,
        TransferOutcome::Success
    );
    assert_eq!(share.connection_count(), count + 1);
}

#[tokio::test]
async fn test_failed_write_leaves_no_partial_file() {
    let share = fixture();
    add_big_file(&share, "smb://nas/Photos/inbox/big.jpg", 3);
    share.set_write_limit(Some(MB + MB / 2));
    let client = connected(&share).await;

    let outcome = client.copy_file("smb://nas/Photos/inbox/big.jpg", &sorted_target()).await;
    assert!(matches!(outcome, TransferOutcome::UnknownError(_)), "got {:?}", outcome);
    assert!(!share.contains("smb://nas/Photos/sorted/big.jpg"));

    share.set_write_limit(None);
    let retry = client.copy_file("smb://nas/Photos/inbox/big.jpg", &sorted_target()).await;
    assert_eq!(retry, TransferOutcome::Success);
    assert_eq!(
        share.file_contents("smb://nas/Photos/sorted/big.jpg"),
        share.file_contents("smb://nas/Photos/inbox/big.jpg")
    );
}

#[tokio::test]
async fn test_stalled_write_times_out_and_is_removed() {
    let share = fixture();
    share.set_write_delay(Duration::from_millis(400));
    let client = with_operation_timeout(&share, 100);
    assert!(client.connect("nas", "", "").await);

    let outcome = client.write_file("nas", "Photos/sorted", "new.jpg", JPEG).await;

    assert!(matches!(outcome, TransferOutcome::NetworkError(_)), "got {:?}", outcome);
    assert!(!share.contains("smb://nas/Photos/sorted/new.jpg"));
}

#[tokio::test]
async fn test_large_copy_is_timed_per_chunk() {
    let share = fixture();
    add_big_file(&share, "smb://nas/Photos/inbox/big.jpg", 4);
    share.set_write_delay(Duration::from_millis(50));
    let client = with_operation_timeout(&share, 120);
    assert!(client.connect("nas", "", "").await);

    let outcome = client.copy_file("smb://nas/Photos/inbox/big.jpg", &sorted_target()).await;

    assert_eq!(outcome, TransferOutcome::Success);
    assert_eq!(
        share.file_contents("smb://nas/Photos/sorted/big.jpg").map(|b| b.len() as u64),
        Some(4 * MB)
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_copies_to_one_destination_run_one_at_a_time() {
    let share = fixture();
    share.set_read_delay(Duration::from_millis(100));
    let client = connected(&share).await;

    let target_a = sorted_target();
    let target_b = sorted_target();
    let (first, second) = tokio::join!(
        client.copy_file("smb://nas/Photos/inbox/a.jpg", &target_a),
        client.copy_file("smb://nas/Photos/inbox/b.mp4", &target_b),
    );

    assert_eq!(first, TransferOutcome::Success);
    assert_eq!(second, TransferOutcome::Success);
    assert_eq!(share.peak_concurrent_reads(), 1);
}

#[tokio::test]
async fn test_copies_to_different_destinations_overlap() {
    let share = fixture();
    share.add_dir("smb://backup/Archive");
    share.set_read_delay(Duration::from_millis(100));
    let client = connected(&share).await;

    let target_a = sorted_target();
    let target_b = ShareTarget::new("backup", "Archive");
    let (first, second) = tokio::join!(
        client.copy_file("smb://nas/Photos/inbox/a.jpg", &target_a),
        client.copy_file("smb://nas/Photos/inbox/b.mp4", &target_b),
    );

    assert_eq!(first, TransferOutcome::Success);
    assert_eq!(second, TransferOutcome::Success);
    assert_eq!(share.peak_concurrent_reads(), 2);
    assert!(share.contains("smb://backup/Archive/b.mp4"));
}

// ============================================================================
// Write permission
// ============================================================================

#[tokio::test]
async fn test_write_check_leaves_nothing_behind() {
    let share = fixture();
    let client = connected(&share).await;

    assert!(client.check_write_permission(&sorted_target()).await);

    let session = share
        .connect("nas", &Credentials::guest(), DialectRange::WIDEST)
        .await
        .unwrap();
    let dir = SharePath::from_address_and_path("nas", "Photos/sorted").unwrap();
    assert!(session.list_directory(&dir).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_write_check_fails_on_read_only_folder() {
    let share = fixture();
    share.set_read_only("smb://nas/Photos/sorted");
    let client = connected(&share).await;
    assert!(!client.check_write_permission(&sorted_target()).await);
}

#[tokio::test]
async fn test_write_check_uses_target_credentials() {
    let share = fixture();
    share.add_dir("smb://backup/Archive");
    share.require_credentials("backup", "bob", "pw");
    let client = connected(&share).await;

    assert!(!client.check_write_permission(&ShareTarget::new("backup", "Archive")).await);
    let with_creds = ShareTarget::new("backup", "Archive").with_credentials(Credentials::new("bob", "pw"));
    assert!(client.check_write_permission(&with_creds).await);
}

#[tokio::test]
async fn test_write_check_fails_when_cleanup_fails() {
    let share = fixture();
    share.fail_deletes_in("smb://nas/Photos/sorted");
    let client = connected(&share).await;

    assert!(!client.check_write_permission(&sorted_target()).await);

    let leftovers = share.entries_in("smb://nas/Photos/sorted");
    assert_eq!(leftovers.len(), 1);
    assert!(leftovers[0].starts_with(".mediasort-"));
}
