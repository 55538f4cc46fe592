//! Revenue Matcher - invoice/transaction reconciliation with AI-assisted review.

pub mod config;
pub mod error;
pub mod learning;
pub mod matching;
pub mod models;
pub mod scoring;
pub mod semantic;
pub mod services;
pub mod utils;
