use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;

/// Writes a message and, optionally, every flow variable to the file log
pub struct DebugPart;

#[async_trait]
impl Part for DebugPart {
    fn part_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let message = ctx
            .properties
            .get("message")
            .and_then(|v| v.as_str())
            .map(|m| ctx.substitute(m))
            .unwrap_or_else(|| "(no message)".to_string());

        ctx.logger.info(format!("DEBUG: {}", message));

        if ctx.property_bool("dump_variables", false) {
            let mut names: Vec<&String> = ctx.variables.keys().collect();
            names.sort();
            for name in names {
                ctx.logger.info(format!("  {}: {}", name, ctx.variables[name].to_display_string()));
            }
        }

        Ok(PartOutput::next(1))
    }
}

pub struct DebugPartFactory;

impl PartFactory for DebugPartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(DebugPart))
    }

    fn part_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Logs a message for debugging".to_string(),
            category: "debug".to_string(),
            kind: PartKind::Process,
            properties: vec![
                PropertyDescriptor::optional("message", PropertyKind::String, "")
                    .describe("Text to log, {variables} are substituted"),
                PropertyDescriptor::optional("dump_variables", PropertyKind::Bool, false),
            ],
            outputs: vec![OutputDefinition::new(1, "Logged")],
        }
    }
}
