use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use fileflow_core::protocol::{
    ClaimRequest, CompleteRequest, FinishedRequest, HelloRequest, LogRequest,
};
use fileflow_core::{
    FileFilter, FileStatus, Flow, Library, LibraryFile, LibraryUid, RegisterRequest, RunnerChannel,
    StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: StoreError) -> HttpResponse {
    match e {
        StoreError::NotFound { .. } => HttpResponse::NotFound().json(ErrorResponse {
            error: e.to_string(),
        }),
        other => {
            error!("Store failure: {}", other);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: other.to_string(),
            })
        }
    }
}

fn ok() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "ok": true }))
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "fileflow",
        "paused": data.scheduler.is_paused(),
    }))
}

#[post("/api/runner/hello")]
async fn runner_hello(
    data: web::Data<AppState>,
    req: web::Json<HelloRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let accepted = data
        .liveness
        .hello(req.runner_uid, req.info)
        .await
        .unwrap_or(false);
    Ok(HttpResponse::Ok().json(accepted))
}

#[post("/api/runner/log")]
async fn runner_log(
    data: web::Data<AppState>,
    req: web::Json<LogRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    match data
        .liveness
        .log_message(req.runner_uid, req.file_uid, req.text)
        .await
    {
        Ok(()) => Ok(ok()),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ErrorResponse {
            error: e.to_string(),
        })),
    }
}

#[post("/api/runner/finished")]
async fn runner_finished(
    data: web::Data<AppState>,
    req: web::Json<FinishedRequest>,
) -> ActixResult<impl Responder> {
    // finished never fails on the host
    let _ = data.liveness.finished(req.runner_uid).await;
    Ok(ok())
}

/// Live runners and their progress
#[get("/api/runners")]
async fn list_runners(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.liveness.runners().await))
}

#[post("/api/node/register")]
async fn register_node(
    data: web::Data<AppState>,
    req: web::Json<RegisterRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    info!("Registration request from '{}'", req.machine_name);
    match data.nodes.register(req).await {
        Ok(node) => Ok(HttpResponse::Ok().json(node)),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/nodes")]
async fn list_nodes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.nodes.nodes().await {
        Ok(nodes) => Ok(HttpResponse::Ok().json(nodes)),
        Err(e) => Ok(error_response(e)),
    }
}

#[post("/api/work/claim")]
async fn claim_work(
    data: web::Data<AppState>,
    req: web::Json<ClaimRequest>,
) -> ActixResult<impl Responder> {
    match data.scheduler.claim_next(req.node_uid).await {
        Ok(file) => Ok(HttpResponse::Ok().json(file)),
        Err(e) => Ok(error_response(e)),
    }
}

#[post("/api/work/complete")]
async fn complete_work(
    data: web::Data<AppState>,
    req: web::Json<CompleteRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    // null when the claim no longer holds and the result was dropped
    match data.scheduler.complete(&req.ticket, req.update).await {
        Ok(file) => Ok(HttpResponse::Ok().json(file)),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.store.flows().await {
        Ok(flows) => {
            let summaries: Vec<_> = flows
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "uid": f.uid,
                        "name": f.name,
                        "enabled": f.enabled,
                        "parts": f.parts.len(),
                    })
                })
                .collect();
            Ok(HttpResponse::Ok().json(summaries))
        }
        Err(e) => Ok(error_response(e)),
    }
}

/// Create or replace a flow. Rejected when its graph does not build.
#[post("/api/flows")]
async fn save_flow(
    data: web::Data<AppState>,
    flow: web::Json<Flow>,
) -> ActixResult<impl Responder> {
    let flow = flow.into_inner();
    if let Err(e) = data.runtime.build_graph(&flow, &HashMap::new()) {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: e.to_string(),
        }));
    }

    info!("Saving flow: {} ({})", flow.name, flow.uid);
    let uid = flow.uid;
    match data.store.upsert_flow(flow).await {
        Ok(()) => Ok(HttpResponse::Created().json(serde_json::json!({ "uid": uid }))),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/flows/{uid}")]
async fn get_flow(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let uid = path.into_inner();
    match data.store.get_flow(uid).await {
        Ok(Some(flow)) => Ok(HttpResponse::Ok().json(flow)),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Flow {} not found", uid),
        })),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/libraries")]
async fn list_libraries(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.store.libraries().await {
        Ok(libraries) => Ok(HttpResponse::Ok().json(libraries)),
        Err(e) => Ok(error_response(e)),
    }
}

#[post("/api/libraries")]
async fn save_library(
    data: web::Data<AppState>,
    library: web::Json<Library>,
) -> ActixResult<impl Responder> {
    let library = library.into_inner();
    info!("Saving library: {} ({})", library.name, library.uid);
    let uid = library.uid;
    match data.store.upsert_library(library).await {
        Ok(()) => Ok(HttpResponse::Created().json(serde_json::json!({ "uid": uid }))),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/libraries/{uid}")]
async fn get_library(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let uid = path.into_inner();
    match data.store.get_library(uid).await {
        Ok(Some(library)) => Ok(HttpResponse::Ok().json(library)),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Library {} not found", uid),
        })),
        Err(e) => Ok(error_response(e)),
    }
}

/// A file found in a library
#[derive(Debug, Deserialize)]
pub struct NewFileRequest {
    pub library_uid: LibraryUid,
    pub relative_path: String,
    #[serde(default)]
    pub size: u64,
    pub flow_uid: Option<Uuid>,
}

#[post("/api/files")]
async fn add_file(
    data: web::Data<AppState>,
    req: web::Json<NewFileRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    match data.store.get_library(req.library_uid).await {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(error_response(StoreError::NotFound {
            kind: "Library",
            uid: req.library_uid,
        })),
        Err(e) => return Ok(error_response(e)),
    }

    let mut file = LibraryFile::new(req.library_uid, req.relative_path, req.size);
    file.flow_uid = req.flow_uid;
    match data.store.insert_file(file.clone()).await {
        Ok(()) => {
            data.events.file_status(file.uid, file.status);
            Ok(HttpResponse::Created().json(file))
        }
        Err(e) => Ok(error_response(e)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    /// Status code, see `FileStatus`
    pub status: Option<i32>,
    pub library: Option<LibraryUid>,
    pub name: Option<String>,
}

/// Files in the order they would be offered to nodes
#[get("/api/files")]
async fn list_files(
    data: web::Data<AppState>,
    query: web::Query<FileQuery>,
) -> ActixResult<impl Responder> {
    let query = query.into_inner();
    let mut filter = FileFilter::default();
    if let Some(code) = query.status {
        match FileStatus::from_code(code) {
            Some(status) => filter.status = Some(status),
            None => {
                return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                    error: format!("Unknown status code {}", code),
                }))
            }
        }
    }
    filter.library_uid = query.library;
    filter.name_contains = query.name;

    match data.scheduler.ranked_files(&filter).await {
        Ok(files) => Ok(HttpResponse::Ok().json(files)),
        Err(e) => Ok(error_response(e)),
    }
}

#[get("/api/files/{uid}/log")]
async fn file_log(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    match data.store.read_log(path.into_inner()).await {
        Ok(lines) => Ok(HttpResponse::Ok().json(lines)),
        Err(e) => Ok(error_response(e)),
    }
}

#[post("/api/files/{uid}/reprocess")]
async fn reprocess_file(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let uid = path.into_inner();
    match data.scheduler.reprocess(uid).await {
        Ok(Some(file)) => Ok(HttpResponse::Ok().json(file)),
        Ok(None) => Ok(HttpResponse::Conflict().json(ErrorResponse {
            error: format!("File {} is processing or changed concurrently", uid),
        })),
        Err(e) => Ok(error_response(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForceRequest {
    #[serde(default = "default_force")]
    pub force: bool,
}

fn default_force() -> bool {
    true
}

#[post("/api/files/{uid}/force")]
async fn force_file(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: Option<web::Json<ForceRequest>>,
) -> ActixResult<impl Responder> {
    let force = req.map(|r| r.force).unwrap_or(true);
    match data.scheduler.force(path.into_inner(), force).await {
        Ok(file) => Ok(HttpResponse::Ok().json(file)),
        Err(e) => Ok(error_response(e)),
    }
}

#[post("/api/system/pause")]
async fn pause(data: web::Data<AppState>) -> impl Responder {
    data.scheduler.pause();
    HttpResponse::Ok().json(serde_json::json!({ "paused": true }))
}

#[post("/api/system/resume")]
async fn resume(data: web::Data<AppState>) -> impl Responder {
    data.scheduler.resume();
    HttpResponse::Ok().json(serde_json::json!({ "paused": false }))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.events.subscribe();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("WebSocket client lagged, {} events dropped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available part types
#[get("/api/parts")]
async fn list_part_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let parts: Vec<_> = registry
        .list_part_types()
        .iter()
        .map(|part_type| {
            serde_json::json!({
                "type": part_type,
                "metadata": registry.get_metadata(part_type),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(parts))
}

/// Mount every route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(runner_hello)
        .service(runner_log)
        .service(runner_finished)
        .service(list_runners)
        .service(register_node)
        .service(list_nodes)
        .service(claim_work)
        .service(complete_work)
        .service(list_flows)
        .service(save_flow)
        .service(get_flow)
        .service(list_libraries)
        .service(save_library)
        .service(get_library)
        .service(add_file)
        .service(list_files)
        .service(file_log)
        .service(reprocess_file)
        .service(force_file)
        .service(pause)
        .service(resume)
        .service(websocket_events)
        .service(list_part_types);
}
