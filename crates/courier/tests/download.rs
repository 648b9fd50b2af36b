use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier::Session;
use courier::data::{ResumeData, SessionConfig};
use courier::effects::{MockResponse, MockTransport, SubmittedBody};
use courier::Request;
use tempfile::tempdir;

const FILE_URL: &str = "https://files.example.com/archive.bin";

fn payload() -> Vec<u8> { (0..2000u32).map(|i| (i % 251) as u8).collect() }

fn mock(chunk_delay: Duration) -> Arc<MockTransport> {
    Arc::new(MockTransport::new().route(
        "/archive.bin",
        MockResponse::ok(payload())
            .header("Content-Disposition", "attachment; filename=\"archive.bin\"")
            .chunked(100, chunk_delay),
    ))
}

#[tokio::test]
async fn test_download_moves_file_to_destination() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("out").join("archive.bin");
    let mock = mock(Duration::ZERO);
    let session = Session::new(mock.clone(), SessionConfig::default()).unwrap();
    let progress = Arc::new(Mutex::new(Vec::new()));

    let sink = progress.clone();
    let response = session
        .download(Request::get(FILE_URL))
        .progress(move |p| sink.lock().unwrap().push(p))
        .destination_path(&target)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.value(), Some(&target));
    assert_eq!(response.download_file.as_ref(), Some(&target));
    assert_eq!(std::fs::read(&target).unwrap(), payload());

    let progress = progress.lock().unwrap();
    assert_eq!(progress.last().and_then(|p| p.fraction_completed()), Some(1.0));
}

#[tokio::test]
async fn test_destination_closure_sees_response() {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let session = Session::new(mock(Duration::ZERO), SessionConfig::default()).unwrap();

    let response = session
        .download(Request::get(FILE_URL))
        .destination(move |_, head| {
            let name = head.and_then(|h| h.suggested_filename()).unwrap_or_default();
            root.join(name)
        })
        .send()
        .await
        .unwrap();

    assert_eq!(response.value(), Some(&dir.path().join("archive.bin")));
}

#[tokio::test]
async fn test_cancel_with_resume_data_then_resume() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("archive.bin");
    let mock = mock(Duration::from_millis(15));
    let session = Session::new(mock.clone(), SessionConfig::default()).unwrap();
    let written = Arc::new(AtomicU64::new(0));

    let sink = written.clone();
    let transfer = session
        .download(Request::get(FILE_URL))
        .progress(move |p| sink.store(p.completed_unit_count, Ordering::SeqCst))
        .destination_path(&target);
    let handle = transfer.handle();

    let (response, ()) = tokio::join!(transfer.send(), async {
        while written.load(Ordering::SeqCst) <= 200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel_producing_resume_data();
    });

    let response = response.unwrap();
    assert!(response.error().is_some_and(|e| e.is_cancelled()));
    assert!(response.download_file.is_none());
    assert!(!target.exists());

    let resume_data = response.resume_data.clone().unwrap();
    assert_eq!(handle.resume_data(), Some(resume_data.clone()));
    let resume = ResumeData::from_bytes(&resume_data).unwrap();
    assert_eq!(resume.url, FILE_URL);
    assert!(resume.offset > 200 && resume.offset < 2000);

    let resumed = session
        .download_resuming(resume_data)
        .destination_path(&target)
        .send()
        .await
        .unwrap();

    assert!(resumed.is_success());
    assert_eq!(std::fs::read(&target).unwrap(), payload());
    assert!(matches!(
        mock.submissions().last().map(|s| &s.body),
        Some(SubmittedBody::ResumeData(_))
    ));
}

#[tokio::test]
async fn test_cancel_without_resume_data() {
    let session = Session::new(mock(Duration::from_millis(15)), SessionConfig::default()).unwrap();
    let transfer = session.download(Request::get(FILE_URL));
    let handle = transfer.handle();

    let (response, ()) = tokio::join!(transfer.send(), async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.cancel();
    });

    let response = response.unwrap();
    assert!(response.error().is_some_and(|e| e.is_cancelled()));
    assert!(response.resume_data.is_none());
    assert!(handle.resume_data().is_none());
}

#[tokio::test]
async fn test_unreadable_resume_file_is_a_construction_error() {
    let dir = tempdir().unwrap();
    let session = Session::new(mock(Duration::ZERO), SessionConfig::default()).unwrap();

    let error = session
        .download_resuming_file(dir.path().join("missing.resume"))
        .send()
        .await
        .unwrap_err();
    assert!(error.is_construction());
}

#[tokio::test]
async fn test_failed_status_keeps_download_error() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockTransport::new().route("/gone", MockResponse::new(410)));
    let session = Session::new(mock.clone(), SessionConfig::default().max_retries(0)).unwrap();

    let response = session
        .download(Request::get("https://files.example.com/gone"))
        .destination_path(dir.path().join("gone"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status_code(), 410);
    assert_eq!(response.error().and_then(|e| e.status_code()), Some(410));
    assert_eq!(mock.submission_count("/gone"), 1);
}
