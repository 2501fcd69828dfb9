// crates/fileflow-core/src/events/mod.rs

mod base;

pub use base::{EventBus, StatusEvent};
