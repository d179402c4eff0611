//! udlf-gateway: HTTP gateway that runs the UDLF binary and indexes its datasets.

pub mod allowlist;
pub mod browser;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod lines;
pub mod metrics;
pub mod rewrite;
pub mod run_config;
pub mod server;
pub mod storage;
pub mod types;
