//! Waiting for a freshly created user's storage to come up.
//!
//! A user becomes usable in three steps: the daemon starts its storage subsystem, the subsystem
//! answers status queries, and finally it accepts the creation of a bucket. Each step fails
//! transiently for a while after the previous one succeeded, so every step is retried with a
//! fixed delay. All steps of one user draw from a single attempt budget.

use std::future::Future;
use std::time::Duration;

use mefs_client::BucketStat;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::provision::{BucketConfig, BucketProvisioner};
use crate::remote::{RemoteError, RemoteResult, StorageClient};

/// How often and how long to retry while a user's storage is not ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between two attempts.
    pub interval: Duration,
    /// Total number of attempts across all readiness steps, or `None` to retry forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            max_attempts: Some(45),
        }
    }
}

/// Errors that end the wait for a user's storage.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The attempt budget ran out before the storage became ready.
    #[error("storage of {address} not ready after {attempts} attempts")]
    Exhausted {
        /// Address of the user.
        address: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        #[source]
        last: RemoteError,
    },

    /// The run was cancelled while waiting.
    #[error("cancelled while waiting for storage of {address}")]
    Cancelled {
        /// Address of the user.
        address: String,
    },
}

/// Drives one user through the readiness steps.
#[derive(Debug)]
pub struct ReadinessPoller<'a, R: ?Sized> {
    remote: &'a R,
    address: &'a str,
    policy: &'a RetryPolicy,
    cancel: &'a CancellationToken,
    attempts: u32,
}

impl<'a, R> ReadinessPoller<'a, R>
where
    R: StorageClient + ?Sized,
{
    /// Creates a poller for the user at `address`.
    pub fn new(
        remote: &'a R,
        address: &'a str,
        policy: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            remote,
            address,
            policy,
            cancel,
            attempts: 0,
        }
    }

    /// The number of attempts made so far, across all steps.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts the user, waits until its storage answers and creates its bucket.
    pub async fn provision(
        &mut self,
        provisioner: &BucketProvisioner,
        bucket: &BucketConfig,
    ) -> Result<BucketStat, ReadinessError> {
        self.start_user().await?;
        self.wait_for_storage().await?;
        self.create_bucket(provisioner, bucket).await
    }

    /// Starts the storage subsystem of the user.
    pub async fn start_user(&mut self) -> Result<(), ReadinessError> {
        let (remote, address) = (self.remote, self.address);
        self.retry("start", move || remote.start_user(address)).await
    }

    /// Polls the storage status until it answers successfully.
    pub async fn wait_for_storage(&mut self) -> Result<(), ReadinessError> {
        let (remote, address) = (self.remote, self.address);
        self.retry("status", move || remote.show_storage(address)).await
    }

    /// Creates the user's bucket, retrying while the daemon refuses.
    pub async fn create_bucket(
        &mut self,
        provisioner: &BucketProvisioner,
        bucket: &BucketConfig,
    ) -> Result<BucketStat, ReadinessError> {
        let (remote, address) = (self.remote, self.address);
        self.retry("bucket", move || provisioner.provision(remote, address, bucket)).await
    }

    async fn retry<T, F, Fut>(
        &mut self,
        step: &'static str,
        mut op: F,
    ) -> Result<T, ReadinessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            self.attempts += 1;
            let err = match op().await {
                Ok(value) => {
                    tracing::debug!(user = self.address, step, attempt = self.attempts, "ready");
                    return Ok(value);
                }
                Err(err) => err,
            };

            tracing::warn!(
                user = self.address,
                step,
                attempt = self.attempts,
                error = &err as &dyn std::error::Error,
                "storage not ready"
            );

            if let Some(max_attempts) = self.policy.max_attempts
                && self.attempts >= max_attempts
            {
                return Err(ReadinessError::Exhausted {
                    address: self.address.to_owned(),
                    attempts: self.attempts,
                    last: err,
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }

    fn cancelled(&self) -> ReadinessError {
        ReadinessError::Cancelled {
            address: self.address.to_owned(),
        }
    }
}
