use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;

/// Sets flow variables from the `variables` property.
///
/// The property is an object (or a JSON object); string values have
/// `{variables}` substituted before they are stored.
pub struct SetVariablesPart;

fn entries(value: &Value) -> Result<Vec<(String, Value)>, PartError> {
    match value {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Json(serde_json::Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_plain_json(v.clone())))
            .collect()),
        Value::String(text) => {
            let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                PartError::Configuration(format!("variables is not valid JSON: {}", e))
            })?;
            entries(&Value::Json(parsed))
        }
        other => Err(PartError::InvalidPropertyType {
            property: "variables".to_string(),
            expected: "object".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

#[async_trait]
impl Part for SetVariablesPart {
    fn part_type(&self) -> &str {
        "variables.set"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let mut output = PartOutput::next(1);
        for (name, value) in entries(ctx.require_property("variables")?)? {
            let value = match value {
                Value::String(text) => Value::String(ctx.substitute(&text)),
                other => other,
            };
            ctx.logger.info(format!("Set variable '{}' = {}", name, value.to_display_string()));
            output = output.with_variable(name, value);
        }
        Ok(output)
    }
}

pub struct SetVariablesPartFactory;

impl PartFactory for SetVariablesPartFactory {
    fn create(&self, properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        if let Some(value) = properties.get("variables") {
            entries(value)?;
        }
        Ok(Box::new(SetVariablesPart))
    }

    fn part_type(&self) -> &str {
        "variables.set"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Set flow variables".to_string(),
            category: "variables".to_string(),
            kind: PartKind::Process,
            properties: vec![PropertyDescriptor::required("variables", PropertyKind::Json)
                .describe("Object of variable name to value")],
            outputs: vec![OutputDefinition::new(1, "Variables set")],
        }
    }
}
