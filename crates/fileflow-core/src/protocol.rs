//! Request bodies exchanged between processing nodes and the host.

use crate::{ClaimTicket, FileUid, FileUpdate, NodeUid, PathMapping, ProgressInfo, RunnerUid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    pub runner_uid: RunnerUid,
    pub info: ProgressInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    pub runner_uid: RunnerUid,
    pub file_uid: FileUid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedRequest {
    pub runner_uid: RunnerUid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub node_uid: NodeUid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub ticket: ClaimTicket,
    pub update: FileUpdate,
}

/// What a node announces about itself when it registers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub machine_name: String,
    /// Address the node can be reached on
    pub address: String,
    #[serde(default)]
    pub temp_path: String,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    /// Runner budget for a node seen for the first time
    #[serde(default)]
    pub max_runners: Option<usize>,
}
