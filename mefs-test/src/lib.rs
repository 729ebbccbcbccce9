//! Test utilities for the MEFS client and benchmark.
//!
//! This crate provides utilities to facilitate testing against a MEFS daemon without running one.
//! See the modules for all available utilities.

pub mod server;
pub mod tracing;
