//! Test harness for the rewind engine
//!
//! - Integration tests drive full sessions end to end through the engine
//! - Property tests check naming and timeline invariants

pub mod integration;
pub mod property;
