//! Shared test utilities for ryoshu integration tests.
//!
//! - `TestHarness`: in-memory database, temp directories and a poll loop
//!   wired to stub collaborators
//! - Stub OCR, LLM and object-store implementations

pub mod harness;
pub mod stubs;

pub use harness::TestHarness;
pub use stubs::*;
