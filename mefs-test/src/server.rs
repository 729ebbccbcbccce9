//! Exposes an in-process fake MEFS daemon for use in integration tests.
//!
//! The fake implements the subset of the daemon's command API used by the client: creating and
//! starting users, querying storage status, creating buckets and putting and getting objects. All
//! state is kept in memory.
//!
//! ```
//! use mefs_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/");
//!    // use the URL in tests...
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::extract::Query;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug)]
struct Bucket {
    id: i32,
    policy: i32,
    data_count: i32,
    parity_count: i32,
}

#[derive(Debug, Default)]
struct User {
    started: bool,
    unready_polls: u32,
    buckets: BTreeMap<String, Bucket>,
    objects: HashMap<(String, String), Bytes>,
}

#[derive(Debug, Default)]
struct Daemon {
    users: BTreeMap<String, User>,
    created: u64,
    unready_polls: u32,
}

type SharedDaemon = Arc<Mutex<Daemon>>;

/// Query parameters of a command: repeated positional `arg`s plus named options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Params {
    arg: Vec<String>,
    address: Option<String>,
    policy: Option<i32>,
    datacount: Option<i32>,
    paritycount: Option<i32>,
}

impl Params {
    fn arg(&self, index: usize) -> DaemonResult<&str> {
        self.arg
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| DaemonError(format!("missing argument {index}")))
    }

    fn address(&self) -> DaemonResult<&str> {
        self.address
            .as_deref()
            .ok_or_else(|| DaemonError("missing option `address`".into()))
    }
}

struct DaemonError(String);

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let body = json!({ "Message": self.0, "Code": 0, "Type": "error" });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

type DaemonResult<T> = Result<T, DaemonError>;

impl Daemon {
    fn started_user(&mut self, address: &str) -> DaemonResult<&mut User> {
        match self.users.get_mut(address) {
            Some(user) if user.started => Ok(user),
            Some(_) => Err(DaemonError("lfs service not ready".into())),
            None => Err(DaemonError(format!("unknown user {address}"))),
        }
    }
}

async fn create_user(State(daemon): State<SharedDaemon>) -> Json<Value> {
    let mut daemon = daemon.lock().unwrap();
    daemon.created += 1;
    let address = format!("0x{:040x}", daemon.created);
    let secret_key = format!("{:064x}", daemon.created);

    let user = User {
        unready_polls: daemon.unready_polls,
        ..Default::default()
    };
    daemon.users.insert(address.clone(), user);

    Json(json!({ "Address": address, "Sk": secret_key }))
}

async fn start_user(
    State(daemon): State<SharedDaemon>,
    Query(params): Query<Params>,
) -> DaemonResult<Json<Value>> {
    let mut daemon = daemon.lock().unwrap();
    let address = params.arg(0)?;
    let user = daemon
        .users
        .get_mut(address)
        .ok_or_else(|| DaemonError(format!("unknown user {address}")))?;
    user.started = true;

    Ok(Json(json!({ "ChildLists": [format!("{address} started")] })))
}

async fn show_storage(
    State(daemon): State<SharedDaemon>,
    Query(params): Query<Params>,
) -> DaemonResult<Json<Value>> {
    let mut daemon = daemon.lock().unwrap();
    let user = daemon.started_user(params.address()?)?;
    if user.unready_polls > 0 {
        user.unready_polls -= 1;
        return Err(DaemonError("group service not ready".into()));
    }

    let used: usize = user.objects.values().map(Bytes::len).sum();
    Ok(Json(json!(format!("{used} B"))))
}

async fn create_bucket(
    State(daemon): State<SharedDaemon>,
    Query(params): Query<Params>,
) -> DaemonResult<Json<Value>> {
    let mut daemon = daemon.lock().unwrap();
    let user = daemon.started_user(params.address()?)?;
    let name = params.arg(0)?;

    let policy = params.policy.unwrap_or(1);
    if !matches!(policy, 1 | 2) {
        return Err(DaemonError(format!("invalid policy {policy}")));
    }
    if user.buckets.contains_key(name) {
        return Err(DaemonError(format!("bucket {name} already exists")));
    }

    let bucket = Bucket {
        id: user.buckets.len() as i32,
        policy,
        data_count: params.datacount.unwrap_or(3),
        parity_count: params.paritycount.unwrap_or(2),
    };
    let stat = json!({
        "BucketName": name,
        "BucketID": bucket.id,
        "Ctime": "now",
        "Policy": bucket.policy,
        "DataCount": bucket.data_count,
        "ParityCount": bucket.parity_count,
    });
    user.buckets.insert(name.to_owned(), bucket);

    Ok(Json(json!({ "Method": "Create Bucket", "Buckets": [stat] })))
}

async fn put_object(
    State(daemon): State<SharedDaemon>,
    Query(params): Query<Params>,
    mut multipart: Multipart,
) -> DaemonResult<Json<Value>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|err| DaemonError(err.to_string()))?
        .ok_or_else(|| DaemonError("missing file part".into()))?;
    let data = field
        .bytes()
        .await
        .map_err(|err| DaemonError(err.to_string()))?;

    let mut daemon = daemon.lock().unwrap();
    let user = daemon.started_user(params.address()?)?;
    let bucket = params.arg(0)?;
    let object = params.arg(1)?;
    if !user.buckets.contains_key(bucket) {
        return Err(DaemonError(format!("bucket {bucket} does not exist")));
    }

    let stat = json!({
        "ObjectName": object,
        "ObjectSize": data.len(),
        "MD5": format!("{:x}", md5::compute(&data)),
        "Ctime": "now",
        "Dir": false,
        "LatestChalTime": "",
    });
    user.objects
        .insert((bucket.to_owned(), object.to_owned()), data);

    Ok(Json(json!({ "Method": "Put Object", "Objects": [stat] })))
}

async fn get_object(
    State(daemon): State<SharedDaemon>,
    Query(params): Query<Params>,
) -> DaemonResult<Bytes> {
    let mut daemon = daemon.lock().unwrap();
    let user = daemon.started_user(params.address()?)?;
    let key = (params.arg(0)?.to_owned(), params.arg(1)?.to_owned());

    user.objects
        .get(&key)
        .cloned()
        .ok_or_else(|| DaemonError(format!("object {} not found", key.1)))
}

fn router(daemon: SharedDaemon) -> Router {
    Router::new()
        .route("/api/v0/create", post(create_user))
        .route("/api/v0/lfs/start", post(start_user))
        .route("/api/v0/lfs/show_storage", post(show_storage))
        .route("/api/v0/lfs/create_bucket", post(create_bucket))
        .route("/api/v0/lfs/put_object", post(put_object))
        .route("/api/v0/lfs/get_object", post(get_object))
        .layer(DefaultBodyLimit::disable())
        .with_state(daemon)
}

/// An in-process fake daemon for use in integration tests.
///
/// The daemon keeps all state in memory and listens on a random available port on localhost. It is
/// shut down when the server is dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    daemon: SharedDaemon,
}

impl TestServer {
    /// Starts a daemon whose users are ready as soon as they are started.
    pub async fn new() -> Self {
        Self::with_unready_polls(0).await
    }

    /// Starts a daemon whose users reject the first `polls` storage status queries after they
    /// have been started.
    pub async fn with_unready_polls(polls: u32) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let daemon = SharedDaemon::default();
        daemon.lock().unwrap().unready_polls = polls;
        let app = router(daemon.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            daemon,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the wire policy code of every bucket, keyed by user address and bucket name.
    pub fn bucket_policies(&self) -> BTreeMap<(String, String), i32> {
        let daemon = self.daemon.lock().unwrap();
        daemon
            .users
            .iter()
            .flat_map(|(address, user)| {
                user.buckets
                    .iter()
                    .map(move |(name, bucket)| ((address.clone(), name.clone()), bucket.policy))
            })
            .collect()
    }

    /// Returns the number of objects stored across all users.
    pub fn object_count(&self) -> usize {
        let daemon = self.daemon.lock().unwrap();
        daemon.users.values().map(|user| user.objects.len()).sum()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
