//! Flow execution runtime
//!
//! This crate provides the engine that walks a flow graph part by part, the
//! part registry, and the node-side machinery that claims files, runs them
//! and reports back to the host, locally or over HTTP.

mod executor;
mod registry;
mod remote;
mod runner;
mod runtime;
mod worker;

pub use executor::{FlowExecutor, FlowGraph, RunContext, RunReport, RunState};
pub use registry::{OutputDefinition, PartFactory, PartMetadata, PartRegistry};
pub use remote::{HostClient, HttpRunnerChannel, HttpWorkSource};
pub use runner::{join_path, run_variables, FileRunner};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use worker::NodeWorker;
