use crate::{substitute_variables, FlowLogger, PartError, PartUid, ProgressHandle, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Core trait every flow part implements
#[async_trait]
pub trait Part: Send + Sync {
    /// Registry key, e.g. "file.copy"
    fn part_type(&self) -> &str;

    /// Run the part once against the working file.
    ///
    /// The returned output index selects the connection the engine follows.
    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError>;
}

/// Declared type of a part property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    String,
    Number,
    Bool,
    Json,
    Any,
}

/// Schema entry for one property of a part type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    pub default: Option<Value>,
    pub required: bool,
    pub description: String,
}

impl PropertyDescriptor {
    pub fn required(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: PropertyKind,
        default: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Some(default.into()),
            required: false,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Execution context passed to each part
#[derive(Clone)]
pub struct PartContext {
    pub part_uid: PartUid,

    /// Fully resolved properties (defaults, model, overrides, self-set values)
    pub properties: HashMap<String, Value>,

    /// Flow variables visible at this point of the run
    pub variables: HashMap<String, Value>,

    /// Path of the file the flow is working on
    pub working_file: String,

    /// Per-file log
    pub logger: FlowLogger,

    /// Percent complete of the current part
    pub progress: ProgressHandle,

    /// Cancelled when the run must stop
    pub cancellation: CancellationToken,
}

impl PartContext {
    pub fn new(part_uid: PartUid, working_file: impl Into<String>, logger: FlowLogger) -> Self {
        Self {
            part_uid,
            properties: HashMap::new(),
            variables: HashMap::new(),
            working_file: working_file.into(),
            logger,
            progress: ProgressHandle::default(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Get a property or fail with `MissingProperty`
    pub fn require_property(&self, name: &str) -> Result<&Value, PartError> {
        match self.properties.get(name) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(PartError::MissingProperty(name.to_string())),
        }
    }

    /// String property with `{variable}` placeholders substituted
    pub fn require_text(&self, name: &str) -> Result<String, PartError> {
        let value = self.require_property(name)?;
        let text = value.as_str().ok_or_else(|| PartError::InvalidPropertyType {
            property: name.to_string(),
            expected: "string".to_string(),
            actual: value.type_name().to_string(),
        })?;
        Ok(self.substitute(text))
    }

    pub fn property_or(&self, name: &str, default: Value) -> Value {
        self.properties.get(name).cloned().unwrap_or(default)
    }

    pub fn property_bool(&self, name: &str, default: bool) -> bool {
        self.properties
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn property_f64(&self, name: &str, default: f64) -> f64 {
        self.properties
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn substitute(&self, text: &str) -> String {
        substitute_variables(text, &self.variables)
    }
}

/// Result of one part execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartOutput {
    /// Output index the engine follows next
    pub output: i32,

    /// Flow variables to set for the remaining parts
    pub variables: HashMap<String, Value>,

    /// Properties the part sets on itself for later visits in the same run
    pub properties: HashMap<String, Value>,

    /// New working file path, when the part produced one
    pub working_file: Option<String>,
}

impl PartOutput {
    pub fn next(output: i32) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_own_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_working_file(mut self, path: impl Into<String>) -> Self {
        self.working_file = Some(path.into());
        self
    }
}
