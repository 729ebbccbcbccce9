use serde::Deserialize;

use crate::Session;

/// How a bucket stores the objects put into it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Objects are split into data and parity shards (Reed-Solomon).
    #[default]
    ErasureCode,
    /// Objects are stored as full copies.
    MultiReplica,
}

impl Policy {
    /// The numeric code of this policy on the wire.
    pub fn code(self) -> i32 {
        match self {
            Policy::ErasureCode => 1,
            Policy::MultiReplica => 2,
        }
    }

    /// Looks up a policy by its numeric wire code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Policy::ErasureCode),
            2 => Some(Policy::MultiReplica),
            _ => None,
        }
    }
}

/// Options for creating a bucket.
///
/// All fields are sent explicitly with every request, the daemon never infers them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketOptions {
    /// The redundancy policy of the bucket.
    ///
    /// Defaults to [`Policy::ErasureCode`].
    pub policy: Policy,
    /// Number of data shards.
    ///
    /// Defaults to `3`.
    pub data_count: u32,
    /// Number of parity shards.
    ///
    /// Defaults to `2`.
    pub parity_count: u32,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            data_count: 3,
            parity_count: 2,
        }
    }
}

/// Descriptor of a bucket as reported by the daemon.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct BucketStat {
    /// The name of the bucket.
    pub bucket_name: String,
    /// The daemon-assigned identifier of the bucket.
    #[serde(rename = "BucketID")]
    pub bucket_id: i32,
    /// Creation time, formatted by the daemon.
    pub ctime: String,
    /// The numeric redundancy policy, see [`Policy::from_code`].
    pub policy: i32,
    /// Number of data shards.
    pub data_count: i32,
    /// Number of parity shards.
    pub parity_count: i32,
}

/// The response of bucket commands.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Buckets {
    /// The command that produced this response.
    pub method: String,
    /// The buckets affected by the command.
    pub buckets: Vec<BucketStat>,
}

impl Session {
    /// Creates a bucket named `name` for this session's user.
    ///
    /// The daemon does not deduplicate: creating an existing bucket again is an error.
    pub async fn create_bucket(
        &self,
        name: &str,
        options: &BucketOptions,
    ) -> crate::Result<Buckets> {
        self.request("lfs/create_bucket")?
            .arg(name)
            .option("policy", options.policy.code())
            .option("datacount", options.data_count)
            .option("paritycount", options.parity_count)
            .exec()
            .await
    }
}
