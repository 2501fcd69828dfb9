use fileflow_core::{
    EventBus, FileStatus, FileStore, InMemoryFileStore, Library, LibraryFile, ProcessingNode,
    Schedule, StatusEvent,
};
use fileflow_scheduler::{ClaimScheduler, SchedulerConfig};
use std::sync::Arc;

struct Fixture {
    store: Arc<InMemoryFileStore>,
    scheduler: Arc<ClaimScheduler>,
    events: Arc<EventBus>,
    library: Library,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryFileStore::new());
    let events = Arc::new(EventBus::default());
    let library = Library::new("Movies", "/media/movies");
    store.upsert_library(library.clone()).await.unwrap();
    let scheduler = Arc::new(ClaimScheduler::new(
        store.clone(),
        events.clone(),
        SchedulerConfig::default(),
    ));
    Fixture {
        store,
        scheduler,
        events,
        library,
    }
}

async fn add_node(store: &InMemoryFileStore, name: &str, max_runners: usize) -> ProcessingNode {
    let node = ProcessingNode::new(name, name, max_runners);
    store.upsert_node(node.clone()).await.unwrap();
    node
}

async fn add_file(store: &InMemoryFileStore, library: &Library, path: &str) -> LibraryFile {
    let file = LibraryFile::new(library.uid, path, 1024);
    store.insert_file(file.clone()).await.unwrap();
    file
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_yield_one_winner() {
    let fx = fixture().await;
    let file = add_file(&fx.store, &fx.library, "a.mkv").await;

    let mut nodes = Vec::new();
    for i in 0..8 {
        nodes.push(add_node(&fx.store, &format!("node-{}", i), 2).await);
    }

    let mut handles = Vec::new();
    for node in nodes {
        let scheduler = fx.scheduler.clone();
        handles.push(tokio::spawn(async move { scheduler.claim_next(node.uid).await }));
    }

    let results = futures::future::join_all(handles).await;
    let winners: Vec<LibraryFile> = results
        .into_iter()
        .filter_map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    let stored = fx.store.get_file(file.uid).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Processing);
    assert_eq!(stored.node_uid, winners[0].node_uid);
    assert!(stored.processing_started.is_some());
}

#[tokio::test]
async fn node_at_capacity_is_refused() {
    let fx = fixture().await;
    add_file(&fx.store, &fx.library, "a.mkv").await;
    add_file(&fx.store, &fx.library, "b.mkv").await;
    let node = add_node(&fx.store, "small", 1).await;

    let first = fx.scheduler.claim_next(node.uid).await.unwrap();
    assert!(first.is_some());

    let second = fx.scheduler.claim_next(node.uid).await.unwrap();
    assert!(second.is_none());
    assert_eq!(fx.store.count_processing_on_node(node.uid).await.unwrap(), 1);
}

#[tokio::test]
async fn claims_follow_store_order() {
    let fx = fixture().await;
    let a = add_file(&fx.store, &fx.library, "a.mkv").await;
    let b = add_file(&fx.store, &fx.library, "b.mkv").await;
    let node = add_node(&fx.store, "big", 4).await;

    let first = fx.scheduler.claim_next(node.uid).await.unwrap().unwrap();
    let second = fx.scheduler.claim_next(node.uid).await.unwrap().unwrap();
    assert_eq!(first.uid, a.uid);
    assert_eq!(second.uid, b.uid);
    assert!(fx.scheduler.claim_next(node.uid).await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_library_is_never_offered() {
    let fx = fixture().await;
    let mut library = fx.library.clone();
    library.enabled = false;
    fx.store.upsert_library(library.clone()).await.unwrap();
    let file = add_file(&fx.store, &library, "a.mkv").await;
    let node = add_node(&fx.store, "node", 2).await;

    assert!(fx.scheduler.claim_next(node.uid).await.unwrap().is_none());

    let disabled = fx
        .scheduler
        .ranked_files(&fileflow_core::FileFilter::status(FileStatus::Disabled))
        .await
        .unwrap();
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0].uid, file.uid);

    // forcing overrides the library gate
    fx.scheduler.force(file.uid, true).await.unwrap();
    let claimed = fx.scheduler.claim_next(node.uid).await.unwrap();
    assert_eq!(claimed.map(|f| f.uid), Some(file.uid));
}

#[tokio::test]
async fn library_runner_limit_spans_nodes() {
    let fx = fixture().await;
    let mut library = fx.library.clone();
    library.max_runners = Some(1);
    fx.store.upsert_library(library.clone()).await.unwrap();
    add_file(&fx.store, &library, "a.mkv").await;
    add_file(&fx.store, &library, "b.mkv").await;
    let one = add_node(&fx.store, "one", 2).await;
    let two = add_node(&fx.store, "two", 2).await;

    assert!(fx.scheduler.claim_next(one.uid).await.unwrap().is_some());
    assert!(fx.scheduler.claim_next(two.uid).await.unwrap().is_none());
}

#[tokio::test]
async fn node_outside_schedule_gets_nothing() {
    let fx = fixture().await;
    add_file(&fx.store, &fx.library, "a.mkv").await;
    let node = ProcessingNode::new("night", "night", 1).with_schedule(Schedule::never());
    fx.store.upsert_node(node.clone()).await.unwrap();

    assert!(fx.scheduler.claim_next(node.uid).await.unwrap().is_none());
}

#[tokio::test]
async fn pause_blocks_claims_until_resumed() {
    let fx = fixture().await;
    add_file(&fx.store, &fx.library, "a.mkv").await;
    let node = add_node(&fx.store, "node", 1).await;
    let mut rx = fx.events.subscribe();

    fx.scheduler.pause();
    assert!(fx.scheduler.is_paused());
    assert!(fx.scheduler.claim_next(node.uid).await.unwrap().is_none());
    assert!(matches!(
        rx.recv().await.unwrap(),
        StatusEvent::ProcessingPaused { paused: true, .. }
    ));

    fx.scheduler.resume();
    assert!(fx.scheduler.claim_next(node.uid).await.unwrap().is_some());
}

#[tokio::test]
async fn reprocess_is_refused_while_processing() {
    let fx = fixture().await;
    let file = add_file(&fx.store, &fx.library, "a.mkv").await;
    let node = add_node(&fx.store, "node", 1).await;

    let claimed = fx.scheduler.claim_next(node.uid).await.unwrap().unwrap();
    assert!(fx.scheduler.reprocess(file.uid).await.unwrap().is_none());

    let ticket = fileflow_core::ClaimTicket::of(&claimed, node.uid);
    fx.scheduler
        .complete(&ticket, fileflow_core::FileUpdate::status(FileStatus::ProcessingFailed))
        .await
        .unwrap()
        .unwrap();

    let requeued = fx.scheduler.reprocess(file.uid).await.unwrap().unwrap();
    assert_eq!(requeued.status, FileStatus::Unprocessed);
    assert!(requeued.node_uid.is_none());
    assert!(requeued.processing_started.is_none());
    assert_eq!(requeued.reclaim_count, 0);
}
