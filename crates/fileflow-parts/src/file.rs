use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn io_failure(action: &str, path: &Path, e: std::io::Error) -> PartError {
    PartError::ExecutionFailed(format!("Failed to {} '{}': {}", action, path.display(), e))
}

/// Copies the working file to `destination`.
///
/// A destination ending in a separator, or naming an existing directory,
/// receives the file under its current name.
pub struct CopyFilePart;

impl CopyFilePart {
    async fn resolve_destination(source: &Path, destination: &str) -> PathBuf {
        let is_dir_hint = destination.ends_with('/') || destination.ends_with('\\');
        let dest = PathBuf::from(destination);
        let is_dir = is_dir_hint
            || tokio::fs::metadata(&dest)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
        match (is_dir, source.file_name()) {
            (true, Some(name)) => dest.join(name),
            _ => dest,
        }
    }
}

#[async_trait]
impl Part for CopyFilePart {
    fn part_type(&self) -> &str {
        "file.copy"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let destination = ctx.require_text("destination")?;
        let source = PathBuf::from(&ctx.working_file);
        let target = Self::resolve_destination(&source, &destination).await;

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create folder", parent, e))?;
        }

        ctx.logger.info(format!("Copying '{}' to '{}'", source.display(), target.display()));
        let copied = tokio::select! {
            copied = tokio::fs::copy(&source, &target) => {
                copied.map_err(|e| io_failure("copy", &source, e))?
            }
            _ = ctx.cancellation.cancelled() => return Err(PartError::Cancelled),
        };
        ctx.logger.info(format!("Copied {} bytes", copied));

        let target = target.to_string_lossy().to_string();
        let mut output = PartOutput::next(1).with_variable("file.CopiedTo", target.as_str());
        if ctx.property_bool("update_working_file", false) {
            output = output.with_working_file(target);
        }
        Ok(output)
    }
}

pub struct CopyFilePartFactory;

impl PartFactory for CopyFilePartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(CopyFilePart))
    }

    fn part_type(&self) -> &str {
        "file.copy"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Copy the working file".to_string(),
            category: "file".to_string(),
            kind: PartKind::Process,
            properties: vec![
                PropertyDescriptor::required("destination", PropertyKind::String)
                    .describe("Target file or folder, {variables} are substituted"),
                PropertyDescriptor::optional("update_working_file", PropertyKind::Bool, false),
            ],
            outputs: vec![OutputDefinition::new(1, "File copied")],
        }
    }
}

/// Deletes the working file. Output 2 when it was already gone.
pub struct DeleteFilePart;

#[async_trait]
impl Part for DeleteFilePart {
    fn part_type(&self) -> &str {
        "file.delete"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let path = PathBuf::from(&ctx.working_file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                ctx.logger.info(format!("Deleted '{}'", path.display()));
                Ok(PartOutput::next(1))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.logger.warn(format!("'{}' does not exist", path.display()));
                Ok(PartOutput::next(2))
            }
            Err(e) => Err(io_failure("delete", &path, e)),
        }
    }
}

pub struct DeleteFilePartFactory;

impl PartFactory for DeleteFilePartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(DeleteFilePart))
    }

    fn part_type(&self) -> &str {
        "file.delete"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Delete the working file".to_string(),
            category: "file".to_string(),
            kind: PartKind::Process,
            properties: Vec::new(),
            outputs: vec![
                OutputDefinition::new(1, "File deleted"),
                OutputDefinition::new(2, "File did not exist"),
            ],
        }
    }
}
