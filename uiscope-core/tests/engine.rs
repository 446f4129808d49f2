// Engine integration tests against a scripted mock target

mod common;

use common::{start_mock, MockOptions, TID};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uiscope_core::{PayloadArchive, PayloadClass, ServiceKind, Session};

const BOUND: Duration = Duration::from_secs(5);

fn test_archive() -> PayloadArchive {
    PayloadArchive::new(vec![PayloadClass {
        name: "uiscope.agent.awt.AwtAgent".to_string(),
        bytes: vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 55],
    }])
}

#[tokio::test]
async fn test_upload_twice_defines_classes_once() {
    let (wire, mock) = start_mock(MockOptions::default()).await;
    let session = Session::new(wire);
    let access = session.thread_access(TID).await;
    let archive = test_archive();

    let first = timeout(
        BOUND,
        session.upload_service_classes(&access, ServiceKind::Awt, &archive),
    )
    .await
    .expect("upload must complete in bounded time")
    .expect("upload must not error");
    assert!(first.is_some(), "first upload must produce a handle");

    let second = timeout(
        BOUND,
        session.upload_service_classes(&access, ServiceKind::Awt, &archive),
    )
    .await
    .expect("re-upload must complete in bounded time")
    .expect("re-upload must not error");
    assert!(second.is_some(), "second upload must reuse the handle");

    assert_eq!(
        mock.define_count.load(Ordering::SeqCst),
        1,
        "class definition must happen exactly once per (session, kind)"
    );

    session.close().await;
}

#[tokio::test]
async fn test_service_available_notification_fires() {
    let (wire, _mock) = start_mock(MockOptions::default()).await;
    let session = Session::new(wire);
    let access = session.thread_access(TID).await;
    let mut available = session.on_service_available();

    session
        .upload_service_classes(&access, ServiceKind::Awt, &test_archive())
        .await
        .unwrap();

    let kind = timeout(BOUND, available.recv())
        .await
        .expect("notification must arrive")
        .expect("channel must stay open");
    assert_eq!(kind, ServiceKind::Awt);

    session.close().await;
}

#[tokio::test]
async fn test_handshake_runs_work_and_releases_lock() {
    let (wire, _mock) = start_mock(MockOptions::default()).await;
    let session = Session::new(wire);
    let access = session.thread_access(TID).await;

    session
        .upload_service_classes(&access, ServiceKind::Awt, &test_archive())
        .await
        .unwrap()
        .expect("service must upload");

    // Thread reports running: the coordinator must drive it to the
    // synchronization entry point and run the work there.
    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_work = ran.clone();
    let result = timeout(
        BOUND,
        session.run_while_stopped(&access, ServiceKind::Awt, async move {
            ran_in_work.store(true, Ordering::SeqCst);
            Ok(7)
        }),
    )
    .await
    .expect("protected region must complete in bounded time")
    .expect("protected region must not error");

    assert_eq!(result, Some(7));
    assert!(ran.load(Ordering::SeqCst));

    // Lock-release invariant: an immediate second protected region is
    // not blocked indefinitely.
    let again = timeout(
        BOUND,
        session.run_while_stopped(&access, ServiceKind::Awt, async { Ok(8) }),
    )
    .await
    .expect("second protected region must not be blocked")
    .expect("second protected region must not error");
    assert_eq!(again, Some(8));

    session.close().await;
}

#[tokio::test]
async fn test_disconnect_before_breakpoint_releases_latch() {
    let (wire, _mock) = start_mock(MockOptions {
        drop_on_access_grant: true,
    })
    .await;
    let session = Session::new(wire);
    let access = session.thread_access(TID).await;

    session
        .upload_service_classes(&access, ServiceKind::Awt, &test_archive())
        .await
        .unwrap()
        .expect("service must upload");

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_work = ran.clone();
    let result = timeout(
        BOUND,
        session.run_while_stopped(&access, ServiceKind::Awt, async move {
            ran_in_work.store(true, Ordering::SeqCst);
            Ok(())
        }),
    )
    .await
    .expect("disconnect must release the latch in bounded time")
    .expect("a vanished session is not an error");

    assert_eq!(result, None, "the work must be abandoned silently");
    assert!(
        !ran.load(Ordering::SeqCst),
        "the unit of work must not run after a disconnect"
    );
}

#[tokio::test]
async fn test_dispatch_thread_discovery() {
    let (wire, _mock) = start_mock(MockOptions::default()).await;
    let session = Session::new(wire);

    let access = session
        .dispatch_thread(ServiceKind::Awt)
        .await
        .unwrap()
        .expect("the mock exposes an AWT dispatch thread");
    assert_eq!(access.id, TID);

    session.close().await;
}
