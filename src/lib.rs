//! retext library crate
//!
//! Exposes the engine stages so the CLI, benchmarks and external tooling
//! can drive them individually or through [`pipeline::Engine`].

pub mod apply;
pub mod batch;
pub mod cache;
pub mod config;
pub mod diff;
pub mod extract;
pub mod oracle;
pub mod pipeline;
pub mod scan;
pub mod util;
