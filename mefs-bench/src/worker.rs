//! The per-user transfer loop.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use mefs_client::UserIdentity;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::provision::{BucketConfig, BucketProvisioner};
use crate::readiness::{ReadinessError, ReadinessPoller, RetryPolicy};
use crate::remote::{RemoteError, StorageClient};
use crate::report::throughput;
use crate::workload::{Benchmark, SizeSampler, object_name};

/// The result of a single upload, download and verify cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferRecord {
    /// Name the object was uploaded as.
    pub object_name: String,
    /// Size of the uploaded payload.
    pub size: u64,
    /// Wall-clock time of the upload, including failed ones.
    pub upload_duration: Duration,
    /// Wall-clock time of the download, if one was attempted.
    pub download_duration: Option<Duration>,
    /// Whether the daemon acknowledged the upload.
    pub upload_ok: bool,
    /// Whether a download was started. Downloads are skipped after failed uploads and when the
    /// output file cannot be created.
    pub download_attempted: bool,
    /// Whether the download completed and its contents match the upload.
    pub download_ok: bool,
    /// Result of comparing digests, or `None` if the download did not complete.
    pub checksum_match: Option<bool>,
    /// Number of bytes received by the download.
    pub downloaded_bytes: u64,
}

impl TransferRecord {
    fn new(object_name: String, size: u64) -> Self {
        Self {
            object_name,
            size,
            ..Default::default()
        }
    }
}

/// How a worker ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    /// All cycles ran, regardless of their individual success.
    Completed,
    /// The user identity could not be created, so no worker ran.
    CreateFailed,
    /// The user's storage did not become ready within the attempt budget.
    ProvisioningFailed {
        /// Number of readiness attempts made.
        attempts: u32,
    },
    /// The run was cancelled before all cycles ran.
    Cancelled,
}

/// The completion signal each user slot sends exactly once.
#[derive(Clone, Debug)]
pub struct WorkerOutcome {
    /// Index of the user slot.
    pub user_index: usize,
    /// Address of the user, if it could be created.
    pub address: Option<String>,
    /// The bucket the user worked in, once it was created.
    pub bucket: Option<BucketConfig>,
    /// How the worker ended.
    pub status: WorkerStatus,
    /// One record per cycle that ran.
    pub records: Vec<TransferRecord>,
}

impl WorkerOutcome {
    /// The outcome of a slot whose user could not be created.
    pub fn create_failed(user_index: usize) -> Self {
        Self::without_user(user_index, WorkerStatus::CreateFailed)
    }

    /// The outcome of a slot whose user was never created because the run was cancelled.
    pub fn cancelled(user_index: usize) -> Self {
        Self::without_user(user_index, WorkerStatus::Cancelled)
    }

    fn without_user(user_index: usize, status: WorkerStatus) -> Self {
        Self {
            user_index,
            address: None,
            bucket: None,
            status,
            records: Vec::new(),
        }
    }

    /// Whether the user got a bucket and was able to run cycles.
    pub fn is_provisioned(&self) -> bool {
        self.bucket.is_some()
    }
}

#[derive(Debug, Error)]
enum DownloadError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("failed to write download: {0}")]
    Io(#[from] io::Error),
}

/// Runs the transfer cycles of a single user.
#[derive(Debug)]
pub struct TransferWorker<R: ?Sized> {
    remote: Arc<R>,
    user_index: usize,
    user: UserIdentity,
    bucket: BucketConfig,
    provisioner: BucketProvisioner,
    readiness: RetryPolicy,
    sampler: SizeSampler,
    objects: usize,
    output_dir: PathBuf,
    settle_delay: Duration,
    cancel: CancellationToken,
}

impl<R> TransferWorker<R>
where
    R: StorageClient + ?Sized,
{
    /// Creates the worker of the user in slot `user_index`.
    pub fn new(
        remote: Arc<R>,
        benchmark: &Benchmark,
        user_index: usize,
        user: UserIdentity,
        cancel: CancellationToken,
    ) -> Self {
        let provisioner = BucketProvisioner::new(benchmark.bucket.clone());
        Self {
            remote,
            user_index,
            user,
            bucket: provisioner.config_for(user_index),
            provisioner,
            readiness: benchmark.readiness.clone(),
            sampler: benchmark.size_sampler(user_index),
            objects: benchmark.objects_per_user,
            output_dir: benchmark.output_dir.clone(),
            settle_delay: benchmark.settle_delay,
            cancel,
        }
    }

    /// Waits for the user's storage, creates its bucket and runs all cycles.
    ///
    /// Individual failures are recorded, never returned.
    pub async fn run(mut self) -> WorkerOutcome {
        let mut outcome = WorkerOutcome {
            user_index: self.user_index,
            address: Some(self.user.address.clone()),
            bucket: None,
            status: WorkerStatus::Completed,
            records: Vec::with_capacity(self.objects),
        };

        let address = self.user.address.as_str();
        let mut poller =
            ReadinessPoller::new(&*self.remote, address, &self.readiness, &self.cancel);
        match poller.provision(&self.provisioner, &self.bucket).await {
            Ok(stat) => {
                tracing::info!(
                    user = address,
                    bucket = stat.bucket_name,
                    policy = ?self.bucket.policy,
                    attempts = poller.attempts(),
                    "bucket created"
                );
                outcome.bucket = Some(self.bucket.clone());
            }
            Err(err @ ReadinessError::Cancelled { .. }) => {
                tracing::info!(user = address, "{err}");
                outcome.status = WorkerStatus::Cancelled;
                return outcome;
            }
            Err(err @ ReadinessError::Exhausted { attempts, .. }) => {
                tracing::error!(
                    user = address,
                    error = &err as &dyn std::error::Error,
                    "giving up on user"
                );
                outcome.status = WorkerStatus::ProvisioningFailed { attempts };
                return outcome;
            }
        }

        for cycle in 0..self.objects {
            if self.cancel.is_cancelled() {
                tracing::info!(user = self.user.address, cycle, "cancelled");
                outcome.status = WorkerStatus::Cancelled;
                break;
            }
            outcome.records.push(self.transfer().await);
        }

        outcome
    }

    async fn transfer(&mut self) -> TransferRecord {
        let payload = self.sampler.next_payload();
        let size = payload.len;
        let address = self.user.address.as_str();
        let bucket = self.bucket.name.as_str();
        let object = object_name(address, size);
        let mut record = TransferRecord::new(object.clone(), size);

        let start = Instant::now();
        let result = self.remote.put_object(address, bucket, &object, payload).await;
        record.upload_duration = start.elapsed();

        let uploaded = match result {
            Ok(stat) => stat,
            Err(err) => {
                tracing::warn!(
                    user = address,
                    object,
                    size,
                    error = &err as &dyn std::error::Error,
                    "upload failed"
                );
                return record;
            }
        };
        record.upload_ok = true;
        tracing::info!(
            user = address,
            object,
            size,
            throughput = %throughput(size, record.upload_duration),
            "uploaded"
        );

        if !self.settle_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(user = address, object, "cancelled before download");
                    return record;
                }
                _ = tokio::time::sleep(self.settle_delay) => {}
            }
        }

        let (path, file) = match create_output_file(&self.output_dir, &object).await {
            Ok(created) => created,
            Err(err) => {
                tracing::warn!(
                    user = address,
                    object,
                    error = &err as &dyn std::error::Error,
                    "cannot create download file, skipping download"
                );
                return record;
            }
        };

        record.download_attempted = true;
        let start = Instant::now();
        let result = download(&*self.remote, address, bucket, &object, file).await;
        let elapsed = start.elapsed();
        record.download_duration = Some(elapsed);

        let (received, digest) = match result {
            Ok(downloaded) => downloaded,
            Err(err) => {
                tracing::warn!(
                    user = address,
                    object,
                    error = &err as &dyn std::error::Error,
                    "download failed"
                );
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = &err as &dyn std::error::Error,
                        "cannot remove incomplete download"
                    );
                }
                return record;
            }
        };
        record.downloaded_bytes = received;

        let matches = digest.eq_ignore_ascii_case(&uploaded.md5);
        record.checksum_match = Some(matches);
        record.download_ok = matches;

        if matches {
            tracing::info!(
                user = address,
                object,
                size = received,
                path = %path.display(),
                throughput = %throughput(received, elapsed),
                "downloaded"
            );
        } else {
            tracing::warn!(
                user = address,
                object,
                expected = uploaded.md5,
                actual = digest,
                "checksum mismatch"
            );
        }

        record
    }
}

/// Streams an object into `file`, returning the number of bytes written and their hex MD5.
async fn download<R>(
    remote: &R,
    address: &str,
    bucket: &str,
    object: &str,
    file: File,
) -> Result<(u64, String), DownloadError>
where
    R: StorageClient + ?Sized,
{
    let mut stream = remote.get_object(address, bucket, object).await?;
    let mut writer = BufWriter::new(file);
    let mut context = md5::Context::new();
    let mut received = 0;

    while let Some(chunk) = stream.try_next().await? {
        context.consume(&chunk);
        writer.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    writer.flush().await?;

    Ok((received, format!("{:x}", context.compute())))
}

/// Creates the file a downloaded object is written to.
///
/// If `root` is a directory the file is named after the object inside it, otherwise `root` is the
/// file path. Existing files are never overwritten: the first free path among `name`, `name.1`,
/// `name.2` and so on is used.
pub async fn create_output_file(root: &Path, object_name: &str) -> io::Result<(PathBuf, File)> {
    let base = match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => root.join(object_name),
        Ok(_) => root.to_path_buf(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => root.to_path_buf(),
        Err(err) => return Err(err),
    };

    let mut path = base.clone();
    let mut suffix = 0u32;
    loop {
        let opened = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match opened {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
                let mut name = base.clone().into_os_string();
                name.push(format!(".{suffix}"));
                path = name.into();
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testutils::{MockStorage, Script};

    use super::*;

    fn benchmark(output_dir: &Path) -> Benchmark {
        Benchmark::builder(output_dir)
            .objects_per_user(3)
            .fixed_sizes([0, 512, 1023])
            .settle_delay(Duration::ZERO)
            .readiness(RetryPolicy {
                interval: Duration::from_millis(1),
                max_attempts: Some(10),
            })
            .build()
    }

    async fn run_worker(remote: &MockStorage, benchmark: &Benchmark) -> WorkerOutcome {
        let user = remote.create_user().await.unwrap();
        let worker = TransferWorker::new(
            Arc::new(remote.clone()),
            benchmark,
            0,
            user,
            CancellationToken::new(),
        );
        worker.run().await
    }

    #[tokio::test]
    async fn output_file_inside_directory() {
        let dir = tempfile::tempdir().unwrap();

        let (path, _file) = create_output_file(dir.path(), "0xabc_12").await.unwrap();
        assert_eq!(path, dir.path().join("0xabc_12"));
    }

    #[tokio::test]
    async fn output_file_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("obj"), b"existing").unwrap();

        let (first, _file) = create_output_file(dir.path(), "obj").await.unwrap();
        let (second, _file) = create_output_file(dir.path(), "obj").await.unwrap();

        assert_eq!(first, dir.path().join("obj.1"));
        assert_eq!(second, dir.path().join("obj.2"));
        assert_eq!(std::fs::read(dir.path().join("obj")).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn output_file_at_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("single");

        let (first, _file) = create_output_file(&root, "obj").await.unwrap();
        let (second, _file) = create_output_file(&root, "obj").await.unwrap();

        assert_eq!(first, root);
        assert_eq!(second, dir.path().join("single.1"));
    }

    #[tokio::test]
    async fn verifies_all_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script::default());

        let outcome = run_worker(&remote, &benchmark(dir.path())).await;

        assert_eq!(outcome.status, WorkerStatus::Completed);
        assert_eq!(outcome.records.len(), 3);
        for record in &outcome.records {
            assert!(record.upload_ok && record.download_ok);
            assert_eq!(record.checksum_match, Some(true));
            assert_eq!(record.downloaded_bytes, record.size);

            let path = dir.path().join(&record.object_name);
            assert_eq!(std::fs::metadata(path).unwrap().len(), record.size);
        }
    }

    #[tokio::test]
    async fn failed_upload_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            failing_puts: vec![2],
            ..Default::default()
        });

        let outcome = run_worker(&remote, &benchmark(dir.path())).await;

        let record = &outcome.records[1];
        assert!(!record.upload_ok);
        assert!(!record.download_attempted);
        assert_eq!(record.download_duration, None);
        assert_eq!(remote.get_calls(), 2);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            failing_gets: vec![2],
            ..Default::default()
        });

        let outcome = run_worker(&remote, &benchmark(dir.path())).await;

        let failed = &outcome.records[1];
        assert!(failed.download_attempted && !failed.download_ok);
        assert_eq!(failed.checksum_match, None);
        assert!(!dir.path().join(&failed.object_name).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_settle_delay() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script::default());
        let benchmark = Benchmark::builder(dir.path())
            .objects_per_user(3)
            .settle_delay(Duration::from_secs(60))
            .build();

        let user = remote.create_user().await.unwrap();
        let cancel = CancellationToken::new();
        let worker = TransferWorker::new(
            Arc::new(remote.clone()),
            &benchmark,
            0,
            user,
            cancel.clone(),
        );

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(5), worker.run())
            .await
            .expect("settle delay ignored cancellation");

        assert_eq!(outcome.status, WorkerStatus::Cancelled);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].upload_ok);
        assert!(!outcome.records[0].download_attempted);
        assert_eq!(remote.get_calls(), 0);
    }

    #[tokio::test]
    async fn detects_corrupted_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            corrupted_gets: vec![1, 3],
            ..Default::default()
        });

        let outcome = run_worker(&remote, &benchmark(dir.path())).await;

        let matches: Vec<_> = outcome.records.iter().map(|r| r.checksum_match).collect();
        assert_eq!(matches, [Some(false), Some(true), Some(false)]);
        assert!(!outcome.records[0].download_ok);
        // the empty payload was corrupted into a single byte
        assert_eq!(outcome.records[0].downloaded_bytes, 1);
    }

    #[tokio::test]
    async fn unwritable_output_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script::default());
        let benchmark = benchmark(&dir.path().join("missing").join("nested"));

        let outcome = run_worker(&remote, &benchmark).await;

        assert_eq!(outcome.records.len(), 3);
        for record in &outcome.records {
            assert!(record.upload_ok);
            assert!(!record.download_attempted && !record.download_ok);
        }
        assert_eq!(remote.get_calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_readiness_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockStorage::new(Script {
            never_ready: true,
            ..Default::default()
        });

        let outcome = run_worker(&remote, &benchmark(dir.path())).await;

        // one start attempt plus nine status polls
        assert_eq!(outcome.status, WorkerStatus::ProvisioningFailed { attempts: 10 });
        assert!(outcome.records.is_empty());
        assert!(!outcome.is_provisioned());
        assert_eq!(remote.put_calls(), 0);
    }
}
