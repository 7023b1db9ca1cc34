//! Shared storage integration tests.
//!
//! Tests the StorageEngine contract against every implementation.
//! Each implementation's test binary imports these test functions and runs them.

pub mod engine_tests;
