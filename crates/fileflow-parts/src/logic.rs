use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Compares the working file size against `size_mb`.
///
/// Output 1 when the comparison holds, 2 when it does not.
pub struct FileSizePart;

#[async_trait]
impl Part for FileSizePart {
    fn part_type(&self) -> &str {
        "logic.file_size"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let size = match tokio::fs::metadata(&ctx.working_file).await {
            Ok(metadata) => metadata.len() as f64,
            Err(_) => ctx
                .variable("file.Size")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    PartError::ExecutionFailed(format!("Cannot size '{}'", ctx.working_file))
                })?,
        };
        let limit = ctx.property_f64("size_mb", 0.0) * BYTES_PER_MB;
        let comparison = ctx
            .properties
            .get("comparison")
            .and_then(|v| v.as_str())
            .unwrap_or("greater")
            .to_ascii_lowercase();

        let holds = match comparison.as_str() {
            "greater" => size > limit,
            "less" => size < limit,
            other => {
                return Err(PartError::Configuration(format!("Unknown comparison: {}", other)));
            }
        };

        ctx.logger.info(format!(
            "File size {:.2}MB {} {:.2}MB: {}",
            size / BYTES_PER_MB,
            comparison,
            limit / BYTES_PER_MB,
            holds
        ));
        Ok(PartOutput::next(if holds { 1 } else { 2 }))
    }
}

pub struct FileSizePartFactory;

impl PartFactory for FileSizePartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(FileSizePart))
    }

    fn part_type(&self) -> &str {
        "logic.file_size"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Branch on the working file size".to_string(),
            category: "logic".to_string(),
            kind: PartKind::Logic,
            properties: vec![
                PropertyDescriptor::required("size_mb", PropertyKind::Number),
                PropertyDescriptor::optional("comparison", PropertyKind::String, "greater")
                    .describe("greater or less"),
            ],
            outputs: vec![
                OutputDefinition::new(1, "Comparison holds"),
                OutputDefinition::new(2, "Comparison does not hold"),
            ],
        }
    }
}

/// Leaves by output 1 for the first `max` visits in a run, then by output 2.
///
/// The visit count is kept as a property the part sets on itself, so it
/// resets with every new run.
pub struct LoopCounterPart;

#[async_trait]
impl Part for LoopCounterPart {
    fn part_type(&self) -> &str {
        "logic.loop_counter"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let max = ctx.property_f64("max", 1.0) as i64;
        let count = ctx.property_f64("count", 0.0) as i64 + 1;

        if count <= max {
            ctx.logger.info(format!("Loop iteration {} of {}", count, max));
            Ok(PartOutput::next(1)
                .with_own_property("count", count)
                .with_variable("loop.Count", count))
        } else {
            ctx.logger.info(format!("Loop limit of {} reached", max));
            Ok(PartOutput::next(2).with_own_property("count", 0i64))
        }
    }
}

pub struct LoopCounterPartFactory;

impl PartFactory for LoopCounterPartFactory {
    fn create(&self, properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        if let Some(max) = properties.get("max").and_then(Value::as_f64) {
            if max < 1.0 {
                return Err(PartError::Configuration("max must be at least 1".to_string()));
            }
        }
        Ok(Box::new(LoopCounterPart))
    }

    fn part_type(&self) -> &str {
        "logic.loop_counter"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Limit how often a loop in the flow repeats".to_string(),
            category: "logic".to_string(),
            kind: PartKind::Logic,
            properties: vec![
                PropertyDescriptor::required("max", PropertyKind::Number),
                PropertyDescriptor::optional("count", PropertyKind::Number, 0.0),
            ],
            outputs: vec![
                OutputDefinition::new(1, "Keep looping"),
                OutputDefinition::new(2, "Limit reached"),
            ],
        }
    }
}

/// Fails the whole run with `reason`
pub struct FailFlowPart;

#[async_trait]
impl Part for FailFlowPart {
    fn part_type(&self) -> &str {
        "flow.fail"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let reason = ctx
            .properties
            .get("reason")
            .and_then(|v| v.as_str())
            .filter(|r| !r.is_empty())
            .map(|r| ctx.substitute(r))
            .unwrap_or_else(|| "Flow failed".to_string());
        ctx.logger.error(&reason);
        Err(PartError::Fatal(reason))
    }
}

pub struct FailFlowPartFactory;

impl PartFactory for FailFlowPartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(FailFlowPart))
    }

    fn part_type(&self) -> &str {
        "flow.fail"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Mark the file as failed".to_string(),
            category: "flow".to_string(),
            kind: PartKind::Failure,
            properties: vec![PropertyDescriptor::optional("reason", PropertyKind::String, "")],
            outputs: Vec::new(),
        }
    }
}
