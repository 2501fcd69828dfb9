use crate::{GraphError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type FlowUid = Uuid;
pub type PartUid = Uuid;

/// Complete flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub uid: FlowUid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub parts: Vec<FlowPartSpec>,
}

fn default_enabled() -> bool {
    true
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            description: None,
            enabled: true,
            parts: Vec::new(),
        }
    }

    pub fn add_part(&mut self, part: FlowPartSpec) -> PartUid {
        let uid = part.uid;
        self.parts.push(part);
        uid
    }

    /// Route `output` of part `from` into part `to`.
    pub fn connect(&mut self, from: PartUid, output: i32, to: PartUid) {
        if let Some(part) = self.parts.iter_mut().find(|p| p.uid == from) {
            part.outputs.retain(|c| c.output != output);
            part.outputs.push(PartConnection { output, target: to });
        }
    }

    pub fn find_part(&self, uid: PartUid) -> Option<&FlowPartSpec> {
        self.parts.iter().find(|p| p.uid == uid)
    }

    /// The single entry part of the flow.
    pub fn input_part(&self) -> Result<&FlowPartSpec, GraphError> {
        let mut inputs = self.parts.iter().filter(|p| p.kind == PartKind::Input);
        match (inputs.next(), inputs.count()) {
            (Some(part), 0) => Ok(part),
            (None, _) => Err(GraphError::NoInputPart),
            (Some(_), extra) => Err(GraphError::MultipleInputParts(extra + 1)),
        }
    }

    /// Structural checks that need no part registry.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.input_part()?;

        let mut seen = HashSet::new();
        for part in &self.parts {
            if !seen.insert(part.uid) {
                return Err(GraphError::DuplicatePart(part.uid));
            }
        }

        for part in &self.parts {
            let mut outputs = HashSet::new();
            for conn in &part.outputs {
                if !seen.contains(&conn.target) {
                    return Err(GraphError::PartNotFound(conn.target));
                }
                if !outputs.insert(conn.output) {
                    return Err(GraphError::InvalidConnection(format!(
                        "part {} routes output {} more than once",
                        part.uid, conn.output
                    )));
                }
                if self.find_part(conn.target).map(|p| p.kind) == Some(PartKind::Input) {
                    return Err(GraphError::InvalidConnection(format!(
                        "part {} routes into the input part",
                        part.uid
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Role a part plays in a flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartKind {
    Input,
    #[default]
    Process,
    Logic,
    Output,
    Failure,
}

/// One step of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPartSpec {
    pub uid: PartUid,
    pub part_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: PartKind,
    /// Statically bound property values
    #[serde(default)]
    pub model: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: Vec<PartConnection>,
}

impl FlowPartSpec {
    pub fn new(part_type: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            part_type: part_type.into(),
            name: None,
            kind: PartKind::Process,
            model: HashMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(part_type: impl Into<String>) -> Self {
        Self::new(part_type).with_kind(PartKind::Input)
    }

    pub fn with_kind(mut self, kind: PartKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.part_type)
    }

    pub fn target_for(&self, output: i32) -> Option<PartUid> {
        self.outputs
            .iter()
            .find(|c| c.output == output)
            .map(|c| c.target)
    }
}

/// Edge from one output of a part to the next part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartConnection {
    pub output: i32,
    pub target: PartUid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> (Flow, PartUid, PartUid) {
        let mut flow = Flow::new("linear");
        let input = flow.add_part(FlowPartSpec::input("input.file"));
        let log = flow.add_part(FlowPartSpec::new("debug.log"));
        flow.connect(input, 1, log);
        (flow, input, log)
    }

    #[test]
    fn valid_flow_passes() {
        let (flow, input, log) = linear();
        assert!(flow.validate().is_ok());
        assert_eq!(flow.input_part().unwrap().uid, input);
        assert_eq!(flow.find_part(input).unwrap().target_for(1), Some(log));
        assert_eq!(flow.find_part(input).unwrap().target_for(2), None);
    }

    #[test]
    fn connect_replaces_existing_output() {
        let (mut flow, input, _) = linear();
        let other = flow.add_part(FlowPartSpec::new("debug.log"));
        flow.connect(input, 1, other);
        let part = flow.find_part(input).unwrap();
        assert_eq!(part.outputs.len(), 1);
        assert_eq!(part.target_for(1), Some(other));
    }

    #[test]
    fn exactly_one_input_required() {
        let mut flow = Flow::new("none");
        flow.add_part(FlowPartSpec::new("debug.log"));
        assert_eq!(flow.validate(), Err(GraphError::NoInputPart));

        flow.add_part(FlowPartSpec::input("input.file"));
        flow.add_part(FlowPartSpec::input("input.file"));
        assert_eq!(flow.validate(), Err(GraphError::MultipleInputParts(2)));
    }

    #[test]
    fn dangling_connection_is_rejected() {
        let (mut flow, _, _) = linear();
        let ghost = Uuid::new_v4();
        flow.parts[0].outputs.push(PartConnection { output: 2, target: ghost });
        assert_eq!(flow.validate(), Err(GraphError::PartNotFound(ghost)));
    }
}
