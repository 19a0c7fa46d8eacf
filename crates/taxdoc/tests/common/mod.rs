//! Shared test utilities for taxdoc integration tests.
//!
//! - `fakes`: scripted model provider and counting text-extraction backends
//! - `harness`: a `DocumentManager` wired to fakes, a temp-dir blob store and
//!   an in-memory database

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
