//! HTTP client module with failure classification.

mod client;
mod status;

pub use client::HttpClient;
pub use status::{HttpFailure, classify_error, classify_status};
