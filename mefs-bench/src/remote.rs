//! The storage service as seen by the benchmark, plus a remote implementation using HTTP to
//! interact with a MEFS daemon.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use mefs_client::{BucketOptions, BucketStat, Client, ClientStream, ObjectStat, UserIdentity};
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::workload::Payload;

/// Errors reported by a [`StorageClient`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request to the daemon failed or the daemon answered with an error.
    #[error(transparent)]
    Client(#[from] mefs_client::Error),

    /// The daemon acknowledged a request without describing what it created.
    #[error("{command} returned no descriptor for `{name}`")]
    MissingDescriptor {
        /// The command that was sent.
        command: &'static str,
        /// The name of the bucket or object that should have been described.
        name: String,
    },

    /// The storage service rejected the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result type for [`StorageClient`] operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The operations of the storage service the benchmark drives.
///
/// All operations other than [`create_user`](Self::create_user) act on behalf of the user with
/// the given `address`.
#[async_trait]
pub trait StorageClient: Debug + Send + Sync + 'static {
    /// Creates a new user identity.
    async fn create_user(&self) -> RemoteResult<UserIdentity>;

    /// Starts the storage subsystem of a funded user.
    async fn start_user(&self, address: &str) -> RemoteResult<()>;

    /// Queries whether the user's storage is serving requests.
    async fn show_storage(&self, address: &str) -> RemoteResult<()>;

    /// Creates a bucket named `name` with explicit redundancy options.
    async fn create_bucket(
        &self,
        address: &str,
        name: &str,
        options: &BucketOptions,
    ) -> RemoteResult<BucketStat>;

    /// Uploads `payload` as `object` into `bucket`, returning the descriptor including its MD5.
    async fn put_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
        payload: Payload,
    ) -> RemoteResult<ObjectStat>;

    /// Downloads the contents of `object` from `bucket`.
    async fn get_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
    ) -> RemoteResult<ClientStream>;
}

/// A remote implementation using HTTP to interact with a MEFS daemon.
#[derive(Debug)]
pub struct HttpRemote {
    /// The client used to talk to the daemon.
    pub client: Client,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` instance for the daemon at `remote`.
    ///
    /// Without a `timeout`, requests may take arbitrarily long once connected.
    pub fn new(remote: &str, timeout: Option<Duration>) -> RemoteResult<Self> {
        let mut builder = Client::builder(remote);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl StorageClient for HttpRemote {
    async fn create_user(&self) -> RemoteResult<UserIdentity> {
        Ok(self.client.create_user().await?)
    }

    async fn start_user(&self, address: &str) -> RemoteResult<()> {
        Ok(self.client.session(address).start().await?)
    }

    async fn show_storage(&self, address: &str) -> RemoteResult<()> {
        Ok(self.client.session(address).show_storage().await?)
    }

    async fn create_bucket(
        &self,
        address: &str,
        name: &str,
        options: &BucketOptions,
    ) -> RemoteResult<BucketStat> {
        let buckets = self
            .client
            .session(address)
            .create_bucket(name, options)
            .await?;

        buckets
            .buckets
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::MissingDescriptor {
                command: "create_bucket",
                name: name.to_owned(),
            })
    }

    async fn put_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
        payload: Payload,
    ) -> RemoteResult<ObjectStat> {
        let len = payload.len;
        let stream = ReaderStream::new(payload).boxed();

        let objects = self
            .client
            .session(address)
            .put_stream(bucket, object, stream, len)
            .send()
            .await?;

        objects
            .into_first()
            .ok_or_else(|| RemoteError::MissingDescriptor {
                command: "put_object",
                name: object.to_owned(),
            })
    }

    async fn get_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
    ) -> RemoteResult<ClientStream> {
        let response = self.client.session(address).get(bucket, object).send().await?;
        Ok(response.stream)
    }
}
