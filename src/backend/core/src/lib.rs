#![allow(clippy::result_large_err)]
//! # kb host core
//!
//! Plugin discovery, the in-memory registry, command composition/dispatch,
//! and execution backends for the `kb` plugin-extensible application host.
//!
//! ## Architecture
//!
//! - **Discovery**: workspace/package/directory/file strategies that locate
//!   plugin manifests and resolve id collisions by precedence
//! - **Snapshot**: checksummed, atomically-persisted on-disk registry state
//! - **Registry**: the in-memory source of truth, with single-flight refresh
//!   and a diff feed for subscribers
//! - **Command**: argv parsing, the command tree, and path resolution, with
//!   host commands always shadowing colliding plugin commands
//! - **Exec**: in-process and subprocess execution backends behind one trait
//! - **Watcher**: debounced filesystem watching that drives registry refresh
//! - **Plugins**: the manifest model and the permission sandbox enforced
//!   against an executing handler

pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod plugins;
pub mod registry;
pub mod snapshot;
pub mod watcher;

pub use error::{HostError, HostErrorKind, ExitClass, ErrorDetails};

/// Re-export of the types most consumers of this crate need.
pub mod prelude {
    pub use crate::command::{CommandOrigin, CommandRecord, CommandTree, DispatchOutcome};
    pub use crate::config::HostConfig;
    pub use crate::discovery::{PluginBrief, PluginSource, StrategyKind};
    pub use crate::error::{ErrorDetails, ExitClass, HostError, HostErrorKind, Result};
    pub use crate::exec::{ExecutionBackend, ExecutionRequest, ExecutionResult};
    pub use crate::plugins::{HandlerContext, HandlerInput, HandlerOutput, Manifest};
    pub use crate::registry::{PluginRegistry, RegistryDiff, RegistryMode};
}
