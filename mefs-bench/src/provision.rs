//! Creation of the per-user bucket.

use mefs_client::{BucketOptions, BucketStat, Policy};

use crate::remote::{RemoteResult, StorageClient};

/// Name and shard counts of the bucket every user creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSettings {
    /// Name of the bucket.
    pub name: String,
    /// Number of data shards.
    pub data_shards: u32,
    /// Number of parity shards.
    pub parity_shards: u32,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            name: "Bucket01".into(),
            data_shards: 3,
            parity_shards: 2,
        }
    }
}

/// How a bucket protects the objects stored in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedundancyPolicy {
    /// Objects are split into data and parity shards.
    ErasureCoded {
        /// Number of data shards.
        data_shards: u32,
        /// Number of parity shards.
        parity_shards: u32,
    },
    /// Objects are stored as full copies.
    Replicated,
}

/// The bucket a single user works in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketConfig {
    /// Name of the bucket.
    pub name: String,
    /// Redundancy policy of the bucket.
    pub policy: RedundancyPolicy,
}

/// Creates the bucket of each user.
///
/// Users alternate between policies so that both storage paths are under load at the same time:
/// even user indices get an erasure-coded bucket, odd indices a replicated one.
#[derive(Clone, Debug)]
pub struct BucketProvisioner {
    settings: BucketSettings,
}

impl BucketProvisioner {
    /// Creates a provisioner for buckets following `settings`.
    pub fn new(settings: BucketSettings) -> Self {
        Self { settings }
    }

    /// Returns the bucket the user at `index` works in.
    pub fn config_for(&self, index: usize) -> BucketConfig {
        let policy = if index % 2 == 0 {
            RedundancyPolicy::ErasureCoded {
                data_shards: self.settings.data_shards,
                parity_shards: self.settings.parity_shards,
            }
        } else {
            RedundancyPolicy::Replicated
        };

        BucketConfig {
            name: self.settings.name.clone(),
            policy,
        }
    }

    /// Translates a bucket into the options sent to the daemon.
    ///
    /// Replicated buckets still carry the configured shard counts.
    pub fn options(&self, config: &BucketConfig) -> BucketOptions {
        match config.policy {
            RedundancyPolicy::ErasureCoded {
                data_shards,
                parity_shards,
            } => BucketOptions {
                policy: Policy::ErasureCode,
                data_count: data_shards,
                parity_count: parity_shards,
            },
            RedundancyPolicy::Replicated => BucketOptions {
                policy: Policy::MultiReplica,
                data_count: self.settings.data_shards,
                parity_count: self.settings.parity_shards,
            },
        }
    }

    /// Creates the bucket for the user at `address`.
    ///
    /// There is no check for an existing bucket of the same name; the daemon decides whether a
    /// second creation fails.
    pub async fn provision<R>(
        &self,
        remote: &R,
        address: &str,
        config: &BucketConfig,
    ) -> RemoteResult<BucketStat>
    where
        R: StorageClient + ?Sized,
    {
        let options = self.options(config);
        remote.create_bucket(address, &config.name, &options).await
    }
}
