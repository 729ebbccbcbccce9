//! In-memory storage service for tests.
//!
//! [`MockStorage`] follows a [`Script`] that decides which calls fail. It is [`Clone`] so tests can
//! hold a handle for inspection while the orchestrator owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use mefs_client::{BucketOptions, BucketStat, ClientStream, ObjectStat, UserIdentity};
use tokio::io::AsyncReadExt;

use crate::remote::{RemoteError, RemoteResult, StorageClient};
use crate::workload::Payload;

/// Failures a [`MockStorage`] injects.
///
/// Call numbers count from 1 across all users.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Failed status queries of each user before its storage answers.
    pub unready_polls: u32,
    /// Storage of every user stays unready forever.
    pub never_ready: bool,
    /// Users, in creation order starting at 0, whose storage stays unready forever.
    pub never_ready_users: Vec<usize>,
    /// Rejected bucket creations of each user before one succeeds.
    pub bucket_failures: u32,
    /// `create_user` calls that fail.
    pub failing_creates: Vec<usize>,
    /// `put_object` calls that fail.
    pub failing_puts: Vec<usize>,
    /// `get_object` calls that fail.
    pub failing_gets: Vec<usize>,
    /// `get_object` calls that return different bytes than were uploaded.
    pub corrupted_gets: Vec<usize>,
}

#[derive(Debug, Default)]
struct MockUser {
    never_ready: bool,
    polls: u32,
    bucket_attempts: u32,
    bucket: Option<BucketOptions>,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<(String, MockUser)>,
    create_calls: usize,
    put_calls: usize,
    get_calls: usize,
    objects: HashMap<(String, String, String), Bytes>,
}

impl State {
    fn user(&mut self, address: &str) -> RemoteResult<&mut MockUser> {
        self.users
            .iter_mut()
            .find(|(a, _)| a == address)
            .map(|(_, user)| user)
            .ok_or_else(|| RemoteError::Rejected(format!("unknown user {address}")))
    }
}

/// A scripted [`StorageClient`] keeping objects in memory.
#[derive(Debug, Clone)]
pub struct MockStorage {
    script: Arc<Script>,
    state: Arc<Mutex<State>>,
}

impl MockStorage {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            state: Arc::default(),
        }
    }

    /// Addresses of all created users in creation order.
    pub fn addresses(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.users.iter().map(|(a, _)| a.clone()).collect()
    }

    /// The options the bucket of `address` was created with.
    pub fn bucket_options(&self, address: &str) -> Option<BucketOptions> {
        let mut state = self.state.lock().unwrap();
        state.user(address).ok().and_then(|user| user.bucket)
    }

    pub fn put_calls(&self) -> usize {
        self.state.lock().unwrap().put_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }
}

#[async_trait]
impl StorageClient for MockStorage {
    async fn create_user(&self) -> RemoteResult<UserIdentity> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if self.script.failing_creates.contains(&state.create_calls) {
            return Err(RemoteError::Rejected("service unavailable".into()));
        }

        let index = state.users.len();
        let address = format!("0x{index:040x}");
        let user = MockUser {
            never_ready: self.script.never_ready || self.script.never_ready_users.contains(&index),
            ..Default::default()
        };
        state.users.push((address.clone(), user));

        Ok(UserIdentity {
            address,
            secret_key: format!("sk{index}"),
        })
    }

    async fn start_user(&self, address: &str) -> RemoteResult<()> {
        self.state.lock().unwrap().user(address).map(|_| ())
    }

    async fn show_storage(&self, address: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state.user(address)?;
        user.polls += 1;
        if user.never_ready || user.polls <= self.script.unready_polls {
            return Err(RemoteError::Rejected("group service not ready".into()));
        }
        Ok(())
    }

    async fn create_bucket(
        &self,
        address: &str,
        name: &str,
        options: &BucketOptions,
    ) -> RemoteResult<BucketStat> {
        let mut state = self.state.lock().unwrap();
        let user = state.user(address)?;
        user.bucket_attempts += 1;
        if user.bucket_attempts <= self.script.bucket_failures {
            return Err(RemoteError::Rejected("not ready to create bucket".into()));
        }
        if user.bucket.is_some() {
            return Err(RemoteError::Rejected(format!("bucket {name} already exists")));
        }
        user.bucket = Some(*options);

        Ok(BucketStat {
            bucket_name: name.to_owned(),
            policy: options.policy.code(),
            data_count: options.data_count as i32,
            parity_count: options.parity_count as i32,
            ..Default::default()
        })
    }

    async fn put_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
        mut payload: Payload,
    ) -> RemoteResult<ObjectStat> {
        let call = {
            let mut state = self.state.lock().unwrap();
            state.put_calls += 1;
            state.put_calls
        };

        let mut contents = Vec::new();
        payload
            .read_to_end(&mut contents)
            .await
            .map_err(|err| RemoteError::Rejected(err.to_string()))?;

        if self.script.failing_puts.contains(&call) {
            return Err(RemoteError::Rejected("size exceeded".into()));
        }

        let stat = ObjectStat {
            object_name: object.to_owned(),
            object_size: contents.len() as i64,
            md5: format!("{:x}", md5::compute(&contents)),
            ..Default::default()
        };

        let key = (address.to_owned(), bucket.to_owned(), object.to_owned());
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key, contents.into());

        Ok(stat)
    }

    async fn get_object(
        &self,
        address: &str,
        bucket: &str,
        object: &str,
    ) -> RemoteResult<ClientStream> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        let call = state.get_calls;
        if self.script.failing_gets.contains(&call) {
            return Err(RemoteError::Rejected("connection reset".into()));
        }

        let key = (address.to_owned(), bucket.to_owned(), object.to_owned());
        let mut bytes = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| RemoteError::Rejected(format!("object {object} not found")))?;

        if self.script.corrupted_gets.contains(&call) {
            let mut corrupted = bytes.to_vec();
            match corrupted.first_mut() {
                Some(byte) => *byte = !*byte,
                None => corrupted.push(0),
            }
            bytes = corrupted.into();
        }

        Ok(futures_util::stream::once(async move { Ok(bytes) }).boxed())
    }
}
