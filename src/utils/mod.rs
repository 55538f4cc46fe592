//! Shared utilities for revenue-matcher.

pub mod dates;
