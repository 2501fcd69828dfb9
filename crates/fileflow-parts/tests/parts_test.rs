use fileflow_core::{FlowLogger, Part, PartContext, PartError, Value};
use fileflow_parts::{
    default_registry, CopyFilePart, DebugPart, DeleteFilePart, DelayPart, ExecutePart, FailFlowPart,
    FileSizePart, InputFilePart, LoopCounterPart, SetVariablesPart,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// Helper function to create a test context
fn create_test_context(working_file: &str, properties: HashMap<String, Value>) -> PartContext {
    let mut ctx = PartContext::new(uuid::Uuid::new_v4(), working_file, FlowLogger::new());
    ctx.properties = properties;
    ctx
}

fn props(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Fresh scratch folder under the system temp dir
async fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fileflow-parts-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
}

async fn write_file(dir: &PathBuf, name: &str, bytes: usize) -> String {
    let path = dir.join(name);
    tokio::fs::write(&path, vec![b'x'; bytes]).await.unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn registry_lists_every_builtin_part() {
    let registry = default_registry();
    assert_eq!(
        registry.list_part_types(),
        vec![
            "debug.log",
            "file.copy",
            "file.delete",
            "flow.fail",
            "http.webhook",
            "input.file",
            "logic.file_size",
            "logic.loop_counter",
            "process.execute",
            "time.delay",
            "variables.set",
        ]
    );
}

#[tokio::test]
async fn test_debug_substitutes_variables() {
    let mut ctx = create_test_context(
        "/media/a.mkv",
        props(&[("message", Value::from("processing {file.Name}"))]),
    );
    ctx.variables.insert("file.Name".to_string(), Value::from("a.mkv"));
    let logger = ctx.logger.clone();

    let output = DebugPart.execute(ctx).await.unwrap();

    assert_eq!(output.output, 1);
    assert!(logger.lines()[0].ends_with("DEBUG: processing a.mkv"));
}

#[tokio::test]
async fn test_input_file_sets_variables() {
    let dir = scratch_dir().await;
    let path = write_file(&dir, "movie.mkv", 10).await;

    let output = InputFilePart
        .execute(create_test_context(&path, HashMap::new()))
        .await
        .unwrap();

    assert_eq!(output.output, 1);
    assert_eq!(output.variables["file.Size"], Value::Number(10.0));
    assert_eq!(output.variables["file.Extension"], Value::from("mkv"));

    let missing = InputFilePart
        .execute(create_test_context(&dir.join("nope.mkv").to_string_lossy(), HashMap::new()))
        .await;
    assert!(matches!(missing, Err(PartError::ExecutionFailed(_))));

    tokio::fs::remove_dir_all(dir).await.unwrap();
}

#[tokio::test]
async fn test_delay_is_cancellable() {
    let ctx = create_test_context("/media/a.mkv", props(&[("delay_ms", Value::from(60_000.0))]));
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { DelayPart.execute(ctx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(PartError::Cancelled)));
}

#[tokio::test]
async fn test_copy_into_folder_and_delete() {
    let dir = scratch_dir().await;
    let path = write_file(&dir, "a.mkv", 16).await;
    let out_dir = dir.join("out");

    let ctx = create_test_context(
        &path,
        props(&[
            ("destination", Value::from(format!("{}/", out_dir.to_string_lossy()))),
            ("update_working_file", Value::Bool(true)),
        ]),
    );
    let output = CopyFilePart.execute(ctx).await.unwrap();

    let copied = out_dir.join("a.mkv").to_string_lossy().to_string();
    assert_eq!(output.output, 1);
    assert_eq!(output.working_file.as_deref(), Some(copied.as_str()));
    assert_eq!(tokio::fs::metadata(&copied).await.unwrap().len(), 16);

    let deleted = DeleteFilePart
        .execute(create_test_context(&copied, HashMap::new()))
        .await
        .unwrap();
    assert_eq!(deleted.output, 1);

    let again = DeleteFilePart
        .execute(create_test_context(&copied, HashMap::new()))
        .await
        .unwrap();
    assert_eq!(again.output, 2);

    tokio::fs::remove_dir_all(dir).await.unwrap();
}

#[tokio::test]
async fn test_file_size_branches() {
    let mut big = create_test_context(
        "/does/not/exist.mkv",
        props(&[("size_mb", Value::from(1.0)), ("comparison", Value::from("greater"))]),
    );
    big.variables
        .insert("file.Size".to_string(), Value::from(5u64 * 1024 * 1024));
    assert_eq!(FileSizePart.execute(big).await.unwrap().output, 1);

    let mut small =
        create_test_context("/does/not/exist.mkv", props(&[("size_mb", Value::from(1.0))]));
    small.variables.insert("file.Size".to_string(), Value::from(10u64));
    assert_eq!(FileSizePart.execute(small).await.unwrap().output, 2);
}

#[tokio::test]
async fn test_loop_counter_sets_own_count() {
    let first = LoopCounterPart
        .execute(create_test_context("/a.mkv", props(&[("max", Value::from(2.0))])))
        .await
        .unwrap();
    assert_eq!(first.output, 1);
    assert_eq!(first.properties["count"], Value::Number(1.0));

    let last = LoopCounterPart
        .execute(create_test_context(
            "/a.mkv",
            props(&[("max", Value::from(2.0)), ("count", Value::from(2.0))]),
        ))
        .await
        .unwrap();
    assert_eq!(last.output, 2);
    assert_eq!(last.properties["count"], Value::Number(0.0));
}

#[tokio::test]
async fn test_set_variables_substitutes_strings() {
    let mut variables = HashMap::new();
    variables.insert("quality".to_string(), Value::from("{file.Name}-hd"));
    variables.insert("retries".to_string(), Value::from(3.0));
    let mut ctx = create_test_context("/a.mkv", props(&[("variables", Value::Object(variables))]));
    ctx.variables.insert("file.Name".to_string(), Value::from("a"));

    let output = SetVariablesPart.execute(ctx).await.unwrap();

    assert_eq!(output.variables["quality"], Value::from("a-hd"));
    assert_eq!(output.variables["retries"], Value::Number(3.0));
}

#[tokio::test]
async fn test_fail_is_fatal() {
    let ctx = create_test_context("/a.mkv", props(&[("reason", Value::from("bad codec"))]));
    let result = FailFlowPart.execute(ctx).await;
    assert!(matches!(result, Err(PartError::Fatal(reason)) if reason == "bad codec"));
}

#[tokio::test]
async fn test_execute_missing_binary_fails() {
    let ctx = create_test_context(
        "/a.mkv",
        props(&[("command", Value::from("fileflow-no-such-binary-4b1d"))]),
    );
    let result = ExecutePart.execute(ctx).await;
    assert!(matches!(result, Err(PartError::ExecutionFailed(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_execute_routes_on_exit_code() {
    let ok = create_test_context(
        "/a.mkv",
        props(&[
            ("command", Value::from("sh")),
            ("arguments", Value::Array(vec![Value::from("-c"), Value::from("echo hello")])),
        ]),
    );
    let output = ExecutePart.execute(ok).await.unwrap();
    assert_eq!(output.output, 1);
    assert_eq!(output.variables["process.StdOut"], Value::from("hello"));

    let failing = create_test_context(
        "/a.mkv",
        props(&[
            ("command", Value::from("sh")),
            ("arguments", Value::Array(vec![Value::from("-c"), Value::from("exit 3")])),
        ]),
    );
    let output = ExecutePart.execute(failing).await.unwrap();
    assert_eq!(output.output, 2);
    assert_eq!(output.variables["process.ExitCode"], Value::Number(3.0));
}
