use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Part error: {0}")]
    Part(#[from] PartError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a flow part while it executes.
#[derive(Error, Debug, Clone)]
pub enum PartError {
    #[error("Missing property: {0}")]
    MissingProperty(String),

    #[error("Invalid type for property '{property}': expected {expected}, got {actual}")]
    InvalidPropertyType {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The part asked for the whole run to fail immediately.
    #[error("Flow failed: {0}")]
    Fatal(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Errors found while loading or building a flow graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Flow not found: {0}")]
    NotFound(Uuid),

    #[error("Flow has no input part")]
    NoInputPart,

    #[error("Flow has {0} input parts, expected exactly one")]
    MultipleInputParts(usize),

    #[error("Duplicate part uid: {0}")]
    DuplicatePart(Uuid),

    #[error("Part not found: {0}")]
    PartNotFound(Uuid),

    #[error("Unknown part type: {0}")]
    UnknownPartType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Part {part} could not be created: {reason}")]
    PartCreation { part: Uuid, reason: String },

    #[error("Part {part} is missing required property '{property}'")]
    MissingRequiredProperty { part: Uuid, property: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {uid}")]
    NotFound { kind: &'static str, uid: Uuid },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn file_not_found(uid: Uuid) -> Self {
        StoreError::NotFound { kind: "File", uid }
    }

    pub fn node_not_found(uid: Uuid) -> Self {
        StoreError::NotFound { kind: "Processing node", uid }
    }
}

/// Errors delivering heartbeats, log lines or claims between a node and the host.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Remote rejected request: {status}: {body}")]
    Rejected { status: u16, body: String },
}
