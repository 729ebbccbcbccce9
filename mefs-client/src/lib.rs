//! # MEFS Client
//!
//! The client talks to the command API of a MEFS daemon. It covers the user lifecycle (creating
//! and starting users), bucket creation and the upload and download of objects.
//!
//! ## Usage
//!
//! ```no_run
//! use mefs_client::{BucketOptions, Client, Policy};
//!
//! #[tokio::main]
//! # async fn main() -> mefs_client::Result<()> {
//!     let client = Client::builder("localhost:5001").build()?;
//!     let user = client.create_user().await?;
//!
//!     let session = client.session(&user.address);
//!     session.start().await?;
//!     session.show_storage().await?;
//!
//!     let options = BucketOptions {
//!         policy: Policy::MultiReplica,
//!         ..Default::default()
//!     };
//!     session.create_bucket("bucket", &options).await?;
//!     session.put("bucket", "hello", "Hello, world!").send().await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod bucket;
mod client;
mod error;
mod get;
mod put;
mod user;

pub use bucket::*;
pub use client::*;
pub use error::*;
pub use get::*;
pub use put::*;
pub use user::*;
