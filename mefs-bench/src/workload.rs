//! A module for defining the [`Benchmark`] that is run against a MEFS daemon.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use std::{io, task};

use bytesize::ByteSize;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};

use crate::provision::BucketSettings;
use crate::readiness::RetryPolicy;

/// A builder for creating a [`Benchmark`].
#[derive(Debug)]
pub struct BenchmarkBuilder {
    users: usize,
    objects_per_user: usize,
    max_object_size: u64,
    fixed_sizes: Vec<u64>,
    output_dir: PathBuf,
    bucket: BucketSettings,
    readiness: RetryPolicy,
    settle_delay: Duration,
    seed: u64,
}

impl BenchmarkBuilder {
    /// The number of simulated users.
    pub fn users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    /// The number of transfer cycles each user runs.
    pub fn objects_per_user(mut self, objects_per_user: usize) -> Self {
        self.objects_per_user = objects_per_user;
        self
    }

    /// Payload sizes are drawn uniformly from `[0, max)`.
    pub fn max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = max;
        self
    }

    /// Replaces random payload sizes with a fixed schedule.
    ///
    /// Every user walks the schedule from the start, wrapping around when it runs out.
    pub fn fixed_sizes(mut self, sizes: impl Into<Vec<u64>>) -> Self {
        self.fixed_sizes = sizes.into();
        self
    }

    /// The bucket every user creates before transferring objects.
    pub fn bucket(mut self, bucket: BucketSettings) -> Self {
        self.bucket = bucket;
        self
    }

    /// How long to wait for a user's storage to become ready.
    pub fn readiness(mut self, readiness: RetryPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Pause between an upload and the download of the same object.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Seed for the RNG driving payload sizes and contents.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the benchmark instance.
    pub fn build(self) -> Benchmark {
        Benchmark {
            users: self.users,
            objects_per_user: self.objects_per_user,
            // an empty range cannot be sampled
            max_object_size: self.max_object_size.max(1),
            fixed_sizes: self.fixed_sizes,
            output_dir: self.output_dir,
            bucket: self.bucket,
            readiness: self.readiness,
            settle_delay: self.settle_delay,
            seed: self.seed,
        }
    }
}

/// Settings of a benchmark run against a MEFS daemon.
#[derive(Debug)]
pub struct Benchmark {
    /// The number of simulated users.
    pub(crate) users: usize,
    /// The number of transfer cycles per user.
    pub(crate) objects_per_user: usize,
    /// Exclusive upper bound of random payload sizes.
    pub(crate) max_object_size: u64,
    /// Fixed payload size schedule, used instead of random sizes when not empty.
    pub(crate) fixed_sizes: Vec<u64>,
    /// Where downloaded objects are written to.
    pub(crate) output_dir: PathBuf,
    /// Name and shard counts of the per-user bucket.
    pub(crate) bucket: BucketSettings,
    /// Retry policy while waiting for user storage.
    pub(crate) readiness: RetryPolicy,
    /// Pause between upload and download.
    pub(crate) settle_delay: Duration,
    /// The seed all per-user RNGs are derived from.
    seed: u64,
}

impl Benchmark {
    /// Constructs a new benchmark builder writing downloads to `output_dir`.
    pub fn builder(output_dir: impl Into<PathBuf>) -> BenchmarkBuilder {
        BenchmarkBuilder {
            users: 3,
            objects_per_user: 1,
            max_object_size: ByteSize::mib(100).as_u64(),
            fixed_sizes: Vec::new(),
            output_dir: output_dir.into(),
            bucket: BucketSettings::default(),
            readiness: RetryPolicy::default(),
            settle_delay: Duration::from_secs(5),
            seed: rand::random(),
        }
    }

    /// The number of simulated users.
    pub fn users(&self) -> usize {
        self.users
    }

    /// The number of transfer cycles per user.
    pub fn objects_per_user(&self) -> usize {
        self.objects_per_user
    }

    pub(crate) fn size_sampler(&self, user_index: usize) -> SizeSampler {
        // spread the user index over all bits so neighbouring users get unrelated streams
        let seed = self.seed ^ (user_index as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        SizeSampler {
            rng: SmallRng::seed_from_u64(seed),
            max: self.max_object_size,
            fixed: self.fixed_sizes.clone(),
            cycle: 0,
        }
    }
}

/// Draws the payloads of one user's transfer cycles.
#[derive(Debug)]
pub(crate) struct SizeSampler {
    rng: SmallRng,
    max: u64,
    fixed: Vec<u64>,
    cycle: usize,
}

impl SizeSampler {
    pub(crate) fn next_payload(&mut self) -> Payload {
        let len = match self.fixed.as_slice() {
            [] => self.rng.random_range(0..self.max),
            sizes => sizes[self.cycle % sizes.len()],
        };
        self.cycle += 1;

        Payload::new(len, self.rng.next_u64())
    }
}

/// Derives the name of the object a user uploads for a payload of `size` bytes.
///
/// Two payloads of the same size uploaded by the same user map to the same object name.
pub fn object_name(address: &str, size: u64) -> String {
    format!("{address}_{size}")
}

/// Randomized contents of an object.
///
/// Clone this instance to reproduce the same contents, for example to compare them with a
/// download.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The number of bytes this payload still yields.
    pub len: u64,
    /// The RNG used to fill the payload with random bytes.
    rng: SmallRng,
}

impl Payload {
    /// Creates a payload of `len` bytes whose contents are determined by `seed`.
    pub fn new(len: u64, seed: u64) -> Self {
        Self {
            len,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.len) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        buf.advance(len_to_fill);

        task::Poll::Ready(Ok(()))
    }
}
