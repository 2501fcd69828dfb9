//! Built-in flow parts
//!
//! File handling, branching and integration parts every node ships with

mod debug;
mod file;
mod http;
mod input;
mod logic;
mod process;
mod time;
mod variables;

pub use debug::DebugPart;
pub use file::{CopyFilePart, DeleteFilePart};
pub use http::WebhookPart;
pub use input::InputFilePart;
pub use logic::{FailFlowPart, FileSizePart, LoopCounterPart};
pub use process::ExecutePart;
pub use time::DelayPart;
pub use variables::SetVariablesPart;
use fileflow_runtime::PartRegistry;

use std::sync::Arc;

/// Register all built-in parts with a registry
pub fn register_all(registry: &mut PartRegistry) {
    registry.register(Arc::new(input::InputFilePartFactory));
    registry.register(Arc::new(debug::DebugPartFactory));
    registry.register(Arc::new(time::DelayPartFactory));
    registry.register(Arc::new(file::CopyFilePartFactory));
    registry.register(Arc::new(file::DeleteFilePartFactory));
    registry.register(Arc::new(logic::FileSizePartFactory));
    registry.register(Arc::new(logic::LoopCounterPartFactory));
    registry.register(Arc::new(logic::FailFlowPartFactory));
    registry.register(Arc::new(variables::SetVariablesPartFactory));
    registry.register(Arc::new(process::ExecutePartFactory));
    registry.register(Arc::new(http::WebhookPartFactory));
}

/// A registry holding every built-in part
pub fn default_registry() -> PartRegistry {
    let mut registry = PartRegistry::new();
    register_all(&mut registry);
    registry
}
