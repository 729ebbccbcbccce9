//! A benchmark which drives the upload and download API of a MEFS daemon from many users at once.
//!
//! Every simulated user gets its own identity and, once its storage is ready, a bucket with a
//! redundancy policy alternating between erasure coding and replication. Each user then runs a
//! fixed number of cycles that upload a random payload, download it again and compare MD5
//! digests. The outcomes of all users are folded into a single [`RunReport`].
//!
//! The storage service is abstracted behind [`StorageClient`](remote::StorageClient), with
//! [`HttpRemote`](remote::HttpRemote) talking to a real daemon.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod observability;
pub mod orchestrator;
pub mod provision;
pub mod readiness;
pub mod remote;
pub mod report;
pub mod worker;
pub mod workload;

#[cfg(test)]
mod testutils;

pub use crate::orchestrator::run;
pub use crate::report::{RunReport, RunSummary};
pub use crate::workload::Benchmark;
