use async_trait::async_trait;
use fileflow_core::{Part, PartContext, PartError, PartKind, PartOutput, Value};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;
use std::path::Path;

/// Entry point of a file flow. Fails when the working file is missing.
pub struct InputFilePart;

#[async_trait]
impl Part for InputFilePart {
    fn part_type(&self) -> &str {
        "input.file"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let metadata = tokio::fs::metadata(&ctx.working_file).await.map_err(|e| {
            PartError::ExecutionFailed(format!("File not found '{}': {}", ctx.working_file, e))
        })?;
        if !metadata.is_file() {
            return Err(PartError::ExecutionFailed(format!(
                "'{}' is not a file",
                ctx.working_file
            )));
        }

        let path = Path::new(&ctx.working_file);
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let folder = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        ctx.logger.info(format!("Input file: {} ({} bytes)", ctx.working_file, metadata.len()));

        Ok(PartOutput::next(1)
            .with_variable("file.Size", metadata.len())
            .with_variable("file.Extension", extension)
            .with_variable("file.Folder", folder))
    }
}

pub struct InputFilePartFactory;

impl PartFactory for InputFilePartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(InputFilePart))
    }

    fn part_type(&self) -> &str {
        "input.file"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Start of a flow that processes a library file".to_string(),
            category: "input".to_string(),
            kind: PartKind::Input,
            properties: Vec::new(),
            outputs: vec![OutputDefinition::new(1, "File exists")],
        }
    }
}
