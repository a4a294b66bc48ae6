//! Integration and E2E tests for DID-WBA authentication

pub mod common;

pub use common::*;
