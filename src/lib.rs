//! Library entrypoint: re‑export modules

pub mod config;
pub mod db_utils;
pub mod errors;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod queries;
pub mod report;
pub mod schema;
pub mod value;
