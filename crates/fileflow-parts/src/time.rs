use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

/// Waits for `delay_ms`, ending early with `Cancelled` when the run is cancelled
pub struct DelayPart;

#[async_trait]
impl Part for DelayPart {
    fn part_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let delay_ms = ctx.property_f64("delay_ms", 1000.0).max(0.0) as u64;

        ctx.logger.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(PartOutput::next(1)),
            _ = ctx.cancellation.cancelled() => Err(PartError::Cancelled),
        }
    }
}

pub struct DelayPartFactory;

impl PartFactory for DelayPartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(DelayPart))
    }

    fn part_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            kind: PartKind::Process,
            properties: vec![PropertyDescriptor::optional(
                "delay_ms",
                PropertyKind::Number,
                1000.0,
            )],
            outputs: vec![OutputDefinition::new(1, "Delay elapsed")],
        }
    }
}
