//! Library crate for port-scan-rs exposing reusable modules.
pub mod batch;
pub mod config;
pub mod error;
pub mod ports;
pub mod scanner;
pub mod server;
pub mod service;
pub mod session;
pub mod types;
