//! Core abstractions for the file flow engine
//!
//! This crate provides the data model (libraries, files, nodes, flows), the
//! eligibility matcher, the store and channel traits, and the part trait that
//! every other crate builds on. It has no server or network dependencies.

mod error;
pub mod events;
mod file;
mod flow;
mod library;
mod log;
pub mod matcher;
mod part;
mod processing_node;
mod progress;
pub mod protocol;
mod schedule;
mod store;
mod value;

pub use error::{ChannelError, FlowError, GraphError, PartError, StoreError};
pub use events::{EventBus, StatusEvent};
pub use file::{ClaimTicket, FileFlags, FileStatus, FileUid, LibraryFile};
pub use flow::{Flow, FlowPartSpec, FlowUid, PartConnection, PartKind, PartUid};
pub use library::{Library, LibraryUid, ProcessingOrder, ProcessingPriority};
pub use log::{FlowLogger, LogLevel};
pub use matcher::{FileFilter, LibraryIndex, SystemInfo};
pub use part::{Part, PartContext, PartOutput, PropertyDescriptor, PropertyKind};
pub use processing_node::{LibraryScope, NodeUid, PathMapping, ProcessingNode};
pub use progress::{
    DetachedChannel, ProgressHandle, ProgressInfo, RunnerChannel, RunnerUid, WorkSource,
    PING_RUNNER,
};
pub use protocol::RegisterRequest;
pub use schedule::{Schedule, SCHEDULE_SLOTS};
pub use store::{FileCondition, FileStore, FileUpdate, InMemoryFileStore, Patch};
pub use value::{substitute_variables, Value};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
