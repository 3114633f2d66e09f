//! # Orchestrator
//!
//! Runs LLM coding agents against a dependency-ordered goal graph.
//!
//! - [`agent`]: one actor per agent, a think/act loop over the gateway and tools
//! - [`goals`]: the goal graph and its readiness rules
//! - [`sandbox`]: one layered workspace per project, container or emulated
//! - [`watcher`]: the periodic sweep that keeps every project moving
//! - [`runtime`]: shared services handed to every actor

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub use orchid_core::{Error, Result};

pub mod agent;
pub mod config;
pub mod error;
pub mod goals;
pub mod projects;
pub mod registry;
pub mod review;
pub mod runtime;
pub mod sandbox;
pub mod store;
pub mod tools;
pub mod watcher;

pub use agent::{AgentConfig, AgentHandle, AgentSnapshot, AgentStatus, ExecutionMode, ToolPolicy};
pub use config::{OrchestratorConfig, SpawnMode};
pub use error::{AgentError, WatcherError};
pub use goals::{Goal, GoalGraph, GoalStatus, NewGoal};
pub use projects::{Project, ProjectStatus, ProjectStore};
pub use registry::AgentRegistry;
pub use runtime::{Runtime, RuntimeBuilder};
pub use sandbox::{SandboxError, SandboxManager, SandboxMode};
pub use store::{InMemoryStore, NewObject, ObjectKind, ObjectStore, StoredObject};
pub use watcher::{SweepReport, WatcherAction, WatcherHandle};
