//! Shared utilities for tests.

pub mod fs;
