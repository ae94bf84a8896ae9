//! HTTP surface and process wiring for the commerce analytics core.

pub mod config;
pub mod error;
pub mod jobs;
pub mod server;
