//! Runs all users of a [`Benchmark`] concurrently and aggregates their outcomes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::remote::StorageClient;
use crate::report::{ResultAggregator, RunSummary};
use crate::worker::{TransferWorker, WorkerOutcome};
use crate::workload::Benchmark;

/// Runs the benchmark against `remote` and returns the final report.
///
/// Users are created one after another, and each one's worker starts right after its creation.
/// The function returns once every user slot has signalled its outcome, however many transfers
/// failed along the way. There is no overall timeout: if readiness is retried forever, a user
/// whose storage never comes up keeps the run from finishing until `cancel` fires.
pub async fn run<R>(remote: Arc<R>, benchmark: Benchmark, cancel: CancellationToken) -> RunSummary
where
    R: StorageClient + ?Sized,
{
    let start = Instant::now();
    let users = benchmark.users;
    tracing::info!(
        users,
        objects_per_user = benchmark.objects_per_user,
        "starting benchmark"
    );

    // every slot sends exactly once, so sends never wait
    let (sender, mut receiver) = mpsc::channel(users.max(1));

    for user_index in 0..users {
        if cancel.is_cancelled() {
            let _ = sender.send(WorkerOutcome::cancelled(user_index)).await;
            continue;
        }

        let user = match remote.create_user().await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(
                    user_index,
                    error = &err as &dyn std::error::Error,
                    "failed to create user"
                );
                let _ = sender.send(WorkerOutcome::create_failed(user_index)).await;
                continue;
            }
        };
        tracing::info!(user_index, user = user.address, "created user");

        let worker = TransferWorker::new(
            Arc::clone(&remote),
            &benchmark,
            user_index,
            user,
            cancel.clone(),
        );
        let sender = sender.clone();
        tokio::spawn(async move {
            let outcome = worker.run().await;
            // the receiver lives until all slots have signalled
            let _ = sender.send(outcome).await;
        });
    }
    drop(sender);

    let mut aggregator = ResultAggregator::new(users);
    while !aggregator.is_complete() {
        let Some(outcome) = receiver.recv().await else {
            tracing::error!(
                pending = aggregator.pending(),
                "workers exited without reporting"
            );
            break;
        };

        tracing::info!(
            user_index = outcome.user_index,
            status = ?outcome.status,
            cycles = outcome.records.len(),
            "user finished"
        );
        aggregator.accept(&outcome);
    }

    // count any signals beyond one per slot
    receiver.close();
    while let Some(extra) = receiver.recv().await {
        aggregator.accept(&extra);
    }

    aggregator.finish(start.elapsed())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use mefs_client::Policy;

    use crate::readiness::RetryPolicy;
    use crate::report::RunReport;
    use crate::testutils::{MockStorage, Script};

    use super::*;

    fn benchmark(output_dir: &Path, users: usize, max_attempts: Option<u32>) -> Benchmark {
        Benchmark::builder(output_dir)
            .users(users)
            .objects_per_user(3)
            .fixed_sizes([0, 512, 1023])
            .max_object_size(1024)
            .settle_delay(Duration::ZERO)
            .readiness(RetryPolicy {
                interval: Duration::from_millis(1),
                max_attempts,
            })
            .build()
    }

    async fn run_mock(remote: &MockStorage, benchmark: Benchmark) -> RunReport {
        let remote = Arc::new(remote.clone());
        let summary = run(remote, benchmark, CancellationToken::new()).await;
        assert_eq!(summary.ignored_signals, 0);
        summary.report
    }

    #[tokio::test]
    async fn single_user_after_failed_polls() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            unready_polls: 2,
            ..Default::default()
        });

        let report = run_mock(&remote, benchmark(dir.path(), 1, Some(10))).await;

        assert_eq!(report, RunReport {
            users_total: 1,
            users_provisioned: 1,
            users_failed: 0,
            uploads_succeeded: 3,
            uploads_failed: 0,
            downloads_succeeded: 3,
            downloads_failed: 0,
            checksum_mismatches: 0,
            bytes_uploaded: 1535,
            bytes_downloaded: 1535,
        });
    }

    #[tokio::test]
    async fn failed_download_is_counted_once() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            unready_polls: 2,
            failing_gets: vec![2],
            ..Default::default()
        });

        let report = run_mock(&remote, benchmark(dir.path(), 1, Some(10))).await;

        assert_eq!(report.uploads_succeeded, 3);
        assert_eq!(report.downloads_succeeded, 2);
        assert_eq!(report.downloads_failed, 1);
        assert_eq!(report.checksum_mismatches, 0);
        assert_eq!(report.users_provisioned + report.users_failed, 1);
    }

    #[tokio::test]
    async fn totals_exclude_unprovisioned_users() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            never_ready_users: vec![2],
            failing_creates: vec![4],
            failing_puts: vec![1],
            ..Default::default()
        });

        let report = run_mock(&remote, benchmark(dir.path(), 4, Some(3))).await;

        assert_eq!(report.users_total, 4);
        assert_eq!(report.users_provisioned, 2);
        assert_eq!(report.users_failed, 2);

        let expected_transfers = (report.users_provisioned * 3) as u64;
        assert_eq!(report.transfers(), expected_transfers);
        assert_eq!(
            report.downloads_succeeded + report.downloads_failed,
            expected_transfers
        );
        assert_eq!(report.uploads_failed, 1);
        assert_eq!(report.downloads_failed, 1);
    }

    #[tokio::test]
    async fn alternates_policies_between_users() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script::default());

        run_mock(&remote, benchmark(dir.path(), 4, Some(10))).await;

        let policies: Vec<_> = remote
            .addresses()
            .iter()
            .map(|address| remote.bucket_options(address).unwrap().policy)
            .collect();
        assert_eq!(policies, [
            Policy::ErasureCode,
            Policy::MultiReplica,
            Policy::ErasureCode,
            Policy::MultiReplica,
        ]);
    }

    #[tokio::test]
    async fn unbounded_readiness_blocks_completion() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            never_ready_users: vec![1],
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let run = run(
            Arc::new(remote.clone()),
            benchmark(dir.path(), 2, None),
            cancel.clone(),
        );
        let result = tokio::time::timeout(Duration::from_millis(300), run).await;
        cancel.cancel();

        assert!(result.is_err(), "run completed despite a user that is never ready");
    }

    #[tokio::test]
    async fn cancellation_ends_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            never_ready: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let run = run(
            Arc::new(remote.clone()),
            benchmark(dir.path(), 3, None),
            cancel,
        );
        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancelled run did not finish");

        assert_eq!(summary.report.users_total, 3);
        assert_eq!(summary.report.users_failed, 3);
        assert_eq!(summary.report.transfers(), 0);
    }

    #[tokio::test]
    async fn works_through_trait_objects() {
        let dir = tempfile::tempdir().unwrap();
        let remote: Arc<dyn StorageClient> = Arc::new(MockStorage::new(Script::default()));

        let benchmark = benchmark(dir.path(), 2, Some(10));
        let summary = run(remote, benchmark, CancellationToken::new()).await;

        assert_eq!(summary.report.uploads_succeeded, 6);
        assert_eq!(summary.report.downloads_succeeded, 6);
    }
}
