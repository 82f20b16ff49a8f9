//! Integration test entry point for veil-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod embedding;
mod latency;
mod runtime;
mod teardown;
