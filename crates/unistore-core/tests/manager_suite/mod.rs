//! Tests for the storage manager facade.
//!
//! Backends are in-process; failures are injected with
//! [`helpers::FlakyBackend`].

pub mod helpers;
pub mod operations;
pub mod providers;
pub mod resilience;
