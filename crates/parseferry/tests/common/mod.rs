//! Shared test utilities for parseferry integration tests.
//!
//! This module provides:
//! - `TestHarness` for driving a `TaskOrchestrator` in an isolated temp dir
//! - `FakeRemoteService` with scripted responses and recorded requests

pub mod fake_remote;
pub mod harness;

pub use fake_remote::*;
pub use harness::*;
