#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Orchid
//!
//! Command-line front end: plan files and the CLI definition. The engine
//! lives in the `orchestrator` crate.

pub mod cli;
pub mod plan;

pub use orchestrator;
pub use orchid_core;
pub use orchid_gateway;
