use async_trait::async_trait;
use fileflow_core::{
    Part, PartContext, PartError, PartKind, PartOutput, PropertyDescriptor, PropertyKind, Value,
};
use fileflow_runtime::{OutputDefinition, PartFactory, PartMetadata};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Duration;

/// Runs an external command against the working file.
///
/// Output 1 when the exit code is one of `success_codes` (default `[0]`),
/// 2 otherwise. The child is killed if the run is cancelled or the timeout
/// elapses.
pub struct ExecutePart;

#[derive(Debug)]
struct ProcessConfig {
    command: String,
    arguments: Vec<String>,
    working_dir: Option<String>,
    env: HashMap<String, String>,
    success_codes: Vec<i32>,
    timeout_seconds: Option<u64>,
}

impl ExecutePart {
    fn parse_config(ctx: &PartContext) -> Result<ProcessConfig, PartError> {
        let command = ctx.require_text("command")?;
        if command.trim().is_empty() {
            return Err(PartError::Configuration("command is empty".to_string()));
        }

        let arguments = match ctx.properties.get("arguments") {
            Some(Value::String(s)) => ctx
                .substitute(s)
                .split_whitespace()
                .map(String::from)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| ctx.substitute(s)))
                .collect(),
            _ => Vec::new(),
        };

        let working_dir = ctx
            .properties
            .get("working_dir")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| ctx.substitute(s));

        let mut env = HashMap::new();
        if let Some(Value::Object(env_obj)) = ctx.properties.get("env") {
            for (key, value) in env_obj {
                env.insert(key.clone(), ctx.substitute(&value.to_display_string()));
            }
        }

        let success_codes = match ctx.properties.get("success_codes") {
            Some(Value::Array(codes)) => codes
                .iter()
                .filter_map(|c| c.as_i64())
                .map(|c| c as i32)
                .collect(),
            Some(value) => value.as_i64().map(|c| vec![c as i32]).unwrap_or_else(|| vec![0]),
            None => vec![0],
        };

        let timeout_seconds = ctx
            .properties
            .get("timeout_seconds")
            .and_then(|v| v.as_f64())
            .filter(|t| *t > 0.0)
            .map(|t| t as u64);

        Ok(ProcessConfig {
            command,
            arguments,
            working_dir,
            env,
            success_codes,
            timeout_seconds,
        })
    }
}

#[async_trait]
impl Part for ExecutePart {
    fn part_type(&self) -> &str {
        "process.execute"
    }

    async fn execute(&self, ctx: PartContext) -> Result<PartOutput, PartError> {
        let config = Self::parse_config(&ctx)?;

        ctx.logger.info(format!("Executing: {} {}", config.command, config.arguments.join(" ")));

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.arguments)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            PartError::ExecutionFailed(format!("Failed to spawn '{}': {}", config.command, e))
        })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let read_output = async {
            let mut stdout_data = Vec::new();
            let mut stderr_data = Vec::new();
            // drain both pipes concurrently
            tokio::try_join!(
                async {
                    match stdout.as_mut() {
                        Some(out) => out.read_to_end(&mut stdout_data).await.map(|_| ()),
                        None => Ok(()),
                    }
                },
                async {
                    match stderr.as_mut() {
                        Some(err) => err.read_to_end(&mut stderr_data).await.map(|_| ()),
                        None => Ok(()),
                    }
                },
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout_data, stderr_data))
        };

        let timeout = config
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX);

        let (status, stdout_data, stderr_data) = tokio::select! {
            finished = tokio::time::timeout(timeout, read_output) => match finished {
                Ok(result) => result.map_err(|e| {
                    PartError::ExecutionFailed(format!("Failed to run process: {}", e))
                })?,
                Err(_) => {
                    ctx.logger.error(format!(
                        "Process timed out after {}s",
                        config.timeout_seconds.unwrap_or_default()
                    ));
                    return Err(PartError::ExecutionFailed("process timed out".to_string()));
                }
            },
            _ = ctx.cancellation.cancelled() => {
                ctx.logger.warn("Process killed: run cancelled");
                return Err(PartError::Cancelled);
            }
        };

        let stdout_str = String::from_utf8_lossy(&stdout_data).trim_end().to_string();
        let stderr_str = String::from_utf8_lossy(&stderr_data).trim_end().to_string();
        for line in stdout_str.lines() {
            ctx.logger.info(line);
        }
        for line in stderr_str.lines() {
            ctx.logger.warn(line);
        }

        let exit_code = status.code().unwrap_or(-1);
        ctx.logger.info(format!("Process exited with code {}", exit_code));

        let output = if config.success_codes.contains(&exit_code) { 1 } else { 2 };
        Ok(PartOutput::next(output)
            .with_variable("process.ExitCode", exit_code as i64)
            .with_variable("process.StdOut", stdout_str)
            .with_variable("process.StdErr", stderr_str))
    }
}

pub struct ExecutePartFactory;

impl PartFactory for ExecutePartFactory {
    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Part>, PartError> {
        Ok(Box::new(ExecutePart))
    }

    fn part_type(&self) -> &str {
        "process.execute"
    }

    fn metadata(&self) -> PartMetadata {
        PartMetadata {
            description: "Execute an external command".to_string(),
            category: "process".to_string(),
            kind: PartKind::Process,
            properties: vec![
                PropertyDescriptor::required("command", PropertyKind::String),
                PropertyDescriptor::optional("arguments", PropertyKind::Any, "")
                    .describe("Whitespace separated string or array of arguments"),
                PropertyDescriptor::optional("working_dir", PropertyKind::String, ""),
                PropertyDescriptor::optional(
                    "env",
                    PropertyKind::Json,
                    Value::Object(HashMap::new()),
                ),
                PropertyDescriptor::optional(
                    "success_codes",
                    PropertyKind::Any,
                    Value::Array(vec![Value::Number(0.0)]),
                ),
                PropertyDescriptor::optional("timeout_seconds", PropertyKind::Number, 0.0),
            ],
            outputs: vec![
                OutputDefinition::new(1, "Exit code indicates success"),
                OutputDefinition::new(2, "Exit code indicates failure"),
            ],
        }
    }
}
