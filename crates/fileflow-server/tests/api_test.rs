use actix_web::{test, web, App};
use fileflow_core::protocol::{ClaimRequest, CompleteRequest, HelloRequest, LogRequest};
use fileflow_core::{
    ClaimTicket, FileStatus, FileStore, FileUpdate, Flow, FlowPartSpec, Library, LibraryFile,
    ProcessingNode, ProgressInfo, RegisterRequest,
};
use fileflow_runtime::PartRegistry;
use fileflow_server::{routes, AppState, ServerConfig};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn app_state() -> web::Data<AppState> {
    let mut registry = PartRegistry::new();
    fileflow_parts::register_all(&mut registry);
    web::Data::new(AppState::new(&ServerConfig::default(), Arc::new(registry)))
}

fn sample_flow() -> Flow {
    let mut flow = Flow::new("Log it");
    let input = flow.add_part(FlowPartSpec::input("input.file"));
    let debug = flow
        .add_part(FlowPartSpec::new("debug.log").with_property("message", "seen {file.Name}"));
    flow.connect(input, 1, debug);
    flow
}

#[actix_web::test]
async fn test_health() {
    let app =
        test::init_service(App::new().app_data(app_state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["paused"], false);
}

#[actix_web::test]
async fn test_invalid_flow_is_rejected() {
    let app =
        test::init_service(App::new().app_data(app_state()).configure(routes::configure)).await;

    let mut flow = Flow::new("Broken");
    flow.add_part(FlowPartSpec::input("input.file"));
    flow.add_part(FlowPartSpec::new("no.such.part"));

    let req = test::TestRequest::post().uri("/api/flows").set_json(&flow).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::get()
        .uri(&format!("/api/flows/{}", flow.uid))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_remote_node_round_trip() {
    let state = app_state();
    let app =
        test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    // a node registers
    let req = test::TestRequest::post()
        .uri("/api/node/register")
        .set_json(&RegisterRequest {
            machine_name: "worker-1".to_string(),
            address: "worker-1".to_string(),
            temp_path: "/tmp/fileflow".to_string(),
            path_mappings: Vec::new(),
            max_runners: Some(2),
        })
        .to_request();
    let node: ProcessingNode = test::call_and_read_body_json(&app, req).await;
    assert_eq!(node.max_runners, 2);

    // operator sets up a flow, a library and a file
    let flow = sample_flow();
    let req = test::TestRequest::post().uri("/api/flows").set_json(&flow).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let library = Library::new("Movies", "/media/movies").with_flow(flow.uid);
    let req = test::TestRequest::post().uri("/api/libraries").set_json(&library).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/files")
        .set_json(json!({
            "library_uid": library.uid,
            "relative_path": "a/movie.mkv",
            "size": 1024,
        }))
        .to_request();
    let file: LibraryFile = test::call_and_read_body_json(&app, req).await;
    assert_eq!(file.name, "movie.mkv");

    // the node claims it
    let req = test::TestRequest::post()
        .uri("/api/work/claim")
        .set_json(&ClaimRequest { node_uid: node.uid })
        .to_request();
    let claimed: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    let claimed = claimed.unwrap();
    assert_eq!(claimed.uid, file.uid);
    assert_eq!(claimed.status, FileStatus::Processing);

    let req = test::TestRequest::post()
        .uri("/api/work/claim")
        .set_json(&ClaimRequest { node_uid: node.uid })
        .to_request();
    let nothing: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    assert!(nothing.is_none());

    // heartbeat and log
    let runner = Uuid::new_v4();
    let req = test::TestRequest::post()
        .uri("/api/runner/hello")
        .set_json(&HelloRequest {
            runner_uid: runner,
            info: ProgressInfo::new(runner, &claimed, node.uid),
        })
        .to_request();
    let accepted: bool = test::call_and_read_body_json(&app, req).await;
    assert!(accepted);

    let req = test::TestRequest::get().uri("/api/runners").to_request();
    let runners: Vec<ProgressInfo> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(runners.len(), 1);

    let req = test::TestRequest::post()
        .uri("/api/runner/log")
        .set_json(&LogRequest {
            runner_uid: runner,
            file_uid: file.uid,
            text: "working".to_string(),
        })
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    // terminal status
    let ticket = ClaimTicket::of(&claimed, node.uid);
    let req = test::TestRequest::post()
        .uri("/api/work/complete")
        .set_json(&CompleteRequest {
            ticket,
            update: FileUpdate::status(FileStatus::Processed).with_final_size(512),
        })
        .to_request();
    let done: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    let done = done.unwrap();
    assert_eq!(done.status, FileStatus::Processed);
    assert_eq!(done.final_size, 512);

    // a second result under the same claim is dropped
    let req = test::TestRequest::post()
        .uri("/api/work/complete")
        .set_json(&CompleteRequest {
            ticket,
            update: FileUpdate::status(FileStatus::ProcessingFailed),
        })
        .to_request();
    let dropped: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    assert!(dropped.is_none());

    let req = test::TestRequest::get()
        .uri(&format!("/api/files/{}/log", file.uid))
        .to_request();
    let lines: Vec<String> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(lines, vec!["working".to_string()]);

    let req = test::TestRequest::get().uri("/api/files?status=1").to_request();
    let processed: Vec<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(processed.len(), 1);

    // reprocess puts it back in the queue
    let req = test::TestRequest::post()
        .uri(&format!("/api/files/{}/reprocess", file.uid))
        .to_request();
    let requeued: LibraryFile = test::call_and_read_body_json(&app, req).await;
    assert_eq!(requeued.status, FileStatus::Unprocessed);
    assert!(requeued.node_uid.is_none());
}

#[actix_web::test]
async fn test_pause_blocks_claims() {
    let state = app_state();
    let app =
        test::init_service(App::new().app_data(state.clone()).configure(routes::configure)).await;

    let library = Library::new("TV", "/media/tv");
    state.store.upsert_library(library.clone()).await.unwrap();
    state
        .store
        .insert_file(LibraryFile::new(library.uid, "e01.mkv", 10))
        .await
        .unwrap();
    let node = ProcessingNode::new("worker", "worker", 1);
    state.store.upsert_node(node.clone()).await.unwrap();

    let req = test::TestRequest::post().uri("/api/system/pause").to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::post()
        .uri("/api/work/claim")
        .set_json(&ClaimRequest { node_uid: node.uid })
        .to_request();
    let claimed: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    assert!(claimed.is_none());

    let req = test::TestRequest::post().uri("/api/system/resume").to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::post()
        .uri("/api/work/claim")
        .set_json(&ClaimRequest { node_uid: node.uid })
        .to_request();
    let claimed: Option<LibraryFile> = test::call_and_read_body_json(&app, req).await;
    assert!(claimed.is_some());
}

#[actix_web::test]
async fn test_unknown_status_code_is_bad_request() {
    let app =
        test::init_service(App::new().app_data(app_state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/api/files?status=42").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
