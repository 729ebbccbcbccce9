use std::sync::Arc;
use std::time::Duration;

use mefs_bench::Benchmark;
use mefs_bench::readiness::RetryPolicy;
use mefs_bench::remote::HttpRemote;
use mefs_test::server::TestServer;
use tokio_util::sync::CancellationToken;

fn benchmark(output_dir: &std::path::Path, users: usize) -> Benchmark {
    Benchmark::builder(output_dir)
        .users(users)
        .objects_per_user(3)
        .max_object_size(64 * 1024)
        .settle_delay(Duration::ZERO)
        .readiness(RetryPolicy {
            interval: Duration::from_millis(10),
            max_attempts: Some(20),
        })
        .seed(7)
        .build()
}

#[tokio::test]
async fn runs_against_daemon() {
    mefs_test::tracing::init();
    let server = TestServer::with_unready_polls(2).await;
    let dir = tempfile::tempdir().unwrap();

    let remote = HttpRemote::new(&server.url("/"), Some(Duration::from_secs(10))).unwrap();
    let summary =
        mefs_bench::run(Arc::new(remote), benchmark(dir.path(), 4), CancellationToken::new()).await;
    let report = summary.report;

    assert_eq!(report.users_total, 4);
    assert_eq!(report.users_provisioned, 4);
    assert_eq!(report.uploads_succeeded, 12);
    assert_eq!(report.uploads_failed, 0);
    assert_eq!(report.downloads_succeeded, 12);
    assert_eq!(report.downloads_failed, 0);
    assert_eq!(report.checksum_mismatches, 0);
    assert_eq!(report.bytes_downloaded, report.bytes_uploaded);

    let downloads = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(downloads, 12);
}

#[tokio::test]
async fn alternates_bucket_policies() {
    let server = TestServer::new().await;
    let dir = tempfile::tempdir().unwrap();

    let remote = HttpRemote::new(&server.url("/"), None).unwrap();
    mefs_bench::run(Arc::new(remote), benchmark(dir.path(), 3), CancellationToken::new()).await;

    let policies: Vec<_> = server.bucket_policies().into_values().collect();
    assert_eq!(policies, [1, 2, 1]);
}

#[tokio::test]
async fn unreachable_daemon_fails_users() {
    let dir = tempfile::tempdir().unwrap();

    // nothing listens on the discard port
    let remote = HttpRemote::new("http://127.0.0.1:9", Some(Duration::from_secs(1))).unwrap();
    let summary =
        mefs_bench::run(Arc::new(remote), benchmark(dir.path(), 2), CancellationToken::new()).await;

    assert_eq!(summary.report.users_total, 2);
    assert_eq!(summary.report.users_failed, 2);
    assert_eq!(summary.report.transfers(), 0);
}
