//! DRAWHOUSE: risk-managed wagering core for 2/3/4-digit number draws.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
mod locks;
pub mod pool;
pub mod risk;
pub mod storage;
pub mod types;
