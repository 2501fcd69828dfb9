use crate::{LibraryUid, Schedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeUid = Uuid;

/// Translation from a path as the server sees it to the node's local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub server: String,
    pub local: String,
}

impl PathMapping {
    pub fn new(server: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            local: local.into(),
        }
    }
}

/// Which libraries a node is allowed to take files from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "libraries")]
pub enum LibraryScope {
    #[default]
    All,
    Only(Vec<LibraryUid>),
    AllExcept(Vec<LibraryUid>),
}

impl LibraryScope {
    pub fn permits(&self, library_uid: LibraryUid) -> bool {
        match self {
            LibraryScope::All => true,
            LibraryScope::Only(list) => list.contains(&library_uid),
            LibraryScope::AllExcept(list) => !list.contains(&library_uid),
        }
    }
}

/// A registered worker able to run flows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingNode {
    pub uid: NodeUid,
    pub name: String,
    pub address: String,
    pub max_runners: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    #[serde(default)]
    pub temp_path: String,
    #[serde(default)]
    pub libraries: LibraryScope,
    #[serde(default)]
    pub max_file_size_mb: Option<u64>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ProcessingNode {
    pub fn new(name: impl Into<String>, address: impl Into<String>, max_runners: usize) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            address: address.into(),
            max_runners,
            enabled: true,
            schedule: Schedule::always(),
            path_mappings: Vec::new(),
            temp_path: String::new(),
            libraries: LibraryScope::All,
            max_file_size_mb: None,
            last_seen: None,
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_libraries(mut self, libraries: LibraryScope) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn with_mapping(mut self, server: impl Into<String>, local: impl Into<String>) -> Self {
        self.path_mappings.push(PathMapping::new(server, local));
        self
    }

    /// Translate a server path to this node's local path.
    ///
    /// The longest matching server prefix wins. Separators in the remainder are
    /// rewritten to the style used by the local side of the mapping.
    pub fn map_path(&self, server_path: &str) -> String {
        let best = self
            .path_mappings
            .iter()
            .filter(|m| !m.server.is_empty() && server_path.starts_with(m.server.as_str()))
            .max_by_key(|m| m.server.len());

        match best {
            Some(mapping) => {
                let rest = &server_path[mapping.server.len()..];
                let local_sep = if mapping.local.contains('\\') && !mapping.local.contains('/') {
                    '\\'
                } else {
                    '/'
                };
                let rest: String = rest
                    .chars()
                    .map(|c| if c == '/' || c == '\\' { local_sep } else { c })
                    .collect();
                let local = mapping.local.trim_end_matches(['/', '\\']);
                format!("{}{}", local, rest)
            }
            None => server_path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_mapping_prefix_wins() {
        let node = ProcessingNode::new("n1", "http://n1:5000/", 2)
            .with_mapping("/media", "/mnt/media")
            .with_mapping("/media/tv", "/mnt/tv");
        assert_eq!(node.map_path("/media/tv/show.mkv"), "/mnt/tv/show.mkv");
        assert_eq!(node.map_path("/media/film.mkv"), "/mnt/media/film.mkv");
        assert_eq!(node.map_path("/other/x.mkv"), "/other/x.mkv");
    }

    #[test]
    fn windows_local_side_rewrites_separators() {
        let node = ProcessingNode::new("win", "http://win:5000/", 1).with_mapping("/media", "M:\\");
        assert_eq!(node.map_path("/media/tv/a.mkv"), "M:\\tv\\a.mkv");
    }

    #[test]
    fn library_scope_filters() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(LibraryScope::All.permits(a));
        assert!(LibraryScope::Only(vec![a]).permits(a));
        assert!(!LibraryScope::Only(vec![a]).permits(b));
        assert!(!LibraryScope::AllExcept(vec![a]).permits(a));
    }
}
