use fileflow_core::{GraphError, Part, PartError, PartKind, PropertyDescriptor, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating part instances
pub trait PartFactory: Send + Sync {
    /// Create a new instance of the part from its resolved properties
    fn create(&self, properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError>;

    /// Get part type identifier
    fn part_type(&self) -> &str;

    /// Description, property schema and outputs of the part type
    fn metadata(&self) -> PartMetadata {
        PartMetadata::default()
    }
}

/// Metadata about a part type
#[derive(Debug, Clone, Serialize)]
pub struct PartMetadata {
    pub description: String,
    pub category: String,
    pub kind: PartKind,
    pub properties: Vec<PropertyDescriptor>,
    pub outputs: Vec<OutputDefinition>,
}

impl Default for PartMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            kind: PartKind::Process,
            properties: Vec::new(),
            outputs: vec![OutputDefinition::new(1, "Success")],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDefinition {
    pub index: i32,
    pub description: String,
}

impl OutputDefinition {
    pub fn new(index: i32, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
        }
    }
}

/// Registry of available part types
pub struct PartRegistry {
    factories: HashMap<String, Arc<dyn PartFactory>>,
}

impl PartRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a part factory
    pub fn register(&mut self, factory: Arc<dyn PartFactory>) {
        let part_type = factory.part_type().to_string();
        tracing::info!("Registering part type: {}", part_type);
        self.factories.insert(part_type, factory);
    }

    pub fn contains(&self, part_type: &str) -> bool {
        self.factories.contains_key(part_type)
    }

    /// Create a part instance from a part type and its resolved properties
    pub fn create_part(
        &self,
        part_uid: uuid::Uuid,
        part_type: &str,
        properties: &HashMap<String, Value>,
    ) -> Result<Arc<dyn Part>, GraphError> {
        let factory = self
            .factories
            .get(part_type)
            .ok_or_else(|| GraphError::UnknownPartType(part_type.to_string()))?;

        factory
            .create(properties)
            .map(Arc::from)
            .map_err(|e| GraphError::PartCreation {
                part: part_uid,
                reason: e.to_string(),
            })
    }

    /// Get all registered part types, sorted
    pub fn list_part_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a part type
    pub fn get_metadata(&self, part_type: &str) -> Option<PartMetadata> {
        self.factories.get(part_type).map(|f| f.metadata())
    }
}

impl Default for PartRegistry {
    fn default() -> Self {
        Self::new()
    }
}
