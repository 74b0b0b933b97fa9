//! End-to-end dispatcher scenarios over real TCP connections.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;

use common::{eventually, within, FakeWorker};
use imgproc_dispatcher::dispatch::{decode_master_message, MasterMessage};
use imgproc_dispatcher::test_utils::{fast_config, start_dispatcher};
use imgproc_dispatcher::{
    DispatcherConfig, InMemoryTaskSource, Operation, TaskDescriptor, TaskSource, WorkerStatus,
};

fn canny(file: &str) -> TaskDescriptor {
    TaskDescriptor::new(file, Operation::CannyEdgeDetector, format!("https://blob/{file}"), None)
        .unwrap()
}

#[tokio::test]
async fn test_canny_task_round_trip() {
    let source = Arc::new(InMemoryTaskSource::new());
    source.push("cat.jpg,canny_edge_detector,https://blob/cat.jpg");
    let dispatcher = start_dispatcher(fast_config(), Some(source.clone() as Arc<dyn TaskSource>))
        .await
        .unwrap();
    let context = dispatcher.context().clone();

    let mut worker = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(worker.next_task().await, "cat.jpg,canny_edge_detector");
    worker.reply("https://blob/result/cat_edges.jpg").await;

    eventually("result recorded", || context.results().len() == 1).await;
    let result = &context.results()[0];
    assert_eq!(result.file_name, "cat.jpg");
    assert_eq!(result.operation, Operation::CannyEdgeDetector);
    assert_eq!(result.result_reference(), Some("https://blob/result/cat_edges.jpg"));
    assert!(source.is_empty());

    let sink = dispatcher.sink.clone();
    eventually("result forwarded", || !sink.results().is_empty()).await;
    assert_eq!(sink.results(), vec!["cat.jpg, canny_edge_detector"]);
    assert!(sink
        .statuses_for("127.0.0.1")
        .contains(&"processing task cat.jpg,canny_edge_detector".to_string()));

    assert!(dispatcher.server.shutdown().await);
}

#[tokio::test]
async fn test_disconnect_before_reply_requeues_task_first() {
    let dispatcher = start_dispatcher(fast_config(), None).await.unwrap();
    let context = dispatcher.context().clone();
    context.enqueue(canny("a.jpg"));
    context.enqueue(canny("b.jpg"));

    let mut first = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(first.next_task().await, "a.jpg,canny_edge_detector");
    assert_eq!(context.pending().len(), 1);
    drop(first);

    eventually("task requeued", || context.pending().len() == 2).await;
    let order: Vec<String> = context
        .pending()
        .snapshot()
        .iter()
        .map(|t| t.file_name().to_string())
        .collect();
    assert_eq!(order, vec!["a.jpg", "b.jpg"]);

    let mut second = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(second.next_task().await, "a.jpg,canny_edge_detector");

    // A session blocked on a result read is not interrupted by shutdown
    drop(second);
    within(dispatcher.server.shutdown()).await;
    assert_eq!(context.pending().len(), 2);
}

#[tokio::test]
async fn test_feature_matching_is_sent_as_three_fields() {
    let source = Arc::new(InMemoryTaskSource::new());
    source.push("left.jpg,feature_matching,https://blob/left.jpg,right.jpg");
    let dispatcher = start_dispatcher(fast_config(), Some(source as Arc<dyn TaskSource>))
        .await
        .unwrap();

    let mut worker = FakeWorker::connect(dispatcher.address).await;
    let message = worker.next_task().await;
    assert_eq!(message, "left.jpg,feature_matching,right.jpg");

    let MasterMessage::Task(assignment) = decode_master_message(message.as_bytes()).unwrap() else {
        panic!("expected a task");
    };
    assert_eq!(assignment.secondary_reference.as_deref(), Some("right.jpg"));

    worker.reply("https://blob/result/left_right_matches.jpg").await;
    let context = dispatcher.context().clone();
    eventually("result recorded", || context.results().len() == 1).await;

    dispatcher.server.shutdown().await;
}

#[tokio::test]
async fn test_idle_worker_receives_no_task_each_interval() {
    let dispatcher = start_dispatcher(
        DispatcherConfig {
            idle_interval_ms: 200,
            ..fast_config()
        },
        None,
    )
    .await
    .unwrap();

    let mut worker = FakeWorker::connect(dispatcher.address).await;
    let mut signal = [0u8; 7];

    within(worker.stream.read_exact(&mut signal)).await.unwrap();
    assert_eq!(&signal, b"NO_TASK");
    let first = Instant::now();

    within(worker.stream.read_exact(&mut signal)).await.unwrap();
    assert_eq!(&signal, b"NO_TASK");
    assert!(first.elapsed() >= Duration::from_millis(150));

    let session = dispatcher.context().registry().active_sessions().remove(0);
    assert_eq!(session.status, WorkerStatus::Idle);
    assert!(session.assigned_task.is_none());

    // Repeated idle cycles leave a single history entry
    let report = dispatcher.context().registry().status_report();
    assert_eq!(report[0].id, "127.0.0.1");
    assert_eq!(report[0].statuses, vec!["connected", "idle"]);

    dispatcher.server.shutdown().await;
}

#[tokio::test]
async fn test_error_reply_hands_task_to_next_worker() {
    let dispatcher = start_dispatcher(fast_config(), None).await.unwrap();
    let context = dispatcher.context().clone();
    context.enqueue(canny("a.jpg"));

    let mut failing = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(failing.next_task().await, "a.jpg,canny_edge_detector");
    failing.reply("ERROR").await;

    // The failing worker's session is torn down
    let mut buffer = [0u8; 16];
    let closed = within(failing.stream.read(&mut buffer)).await.unwrap();
    assert_eq!(closed, 0);
    assert!(context.results().is_empty());

    let mut healthy = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(healthy.next_task().await, "a.jpg,canny_edge_detector");
    healthy.reply("https://blob/result/a_edges.jpg").await;
    eventually("result recorded", || context.results().len() == 1).await;

    dispatcher.server.shutdown().await;
}

#[tokio::test]
async fn test_task_abandoned_after_delivery_attempts() {
    let dispatcher = start_dispatcher(
        DispatcherConfig {
            max_delivery_attempts: 1,
            ..fast_config()
        },
        None,
    )
    .await
    .unwrap();
    let context = dispatcher.context().clone();
    context.enqueue(canny("a.jpg"));

    let mut worker = FakeWorker::connect(dispatcher.address).await;
    worker.next_task().await;
    worker.reply("ERROR").await;

    eventually("failure recorded", || context.results().len() == 1).await;
    assert!(!context.results()[0].is_completed());
    assert!(context.pending().is_empty());

    let sink = dispatcher.sink.clone();
    eventually("failure forwarded", || !sink.results().is_empty()).await;

    dispatcher.server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_workers_complete_every_task_once() {
    let dispatcher = start_dispatcher(fast_config(), None).await.unwrap();
    let context = dispatcher.context().clone();
    for i in 0..12 {
        context.enqueue(canny(&format!("img{i}.jpg")));
    }

    let mut workers = Vec::new();
    for _ in 0..3 {
        let mut worker = FakeWorker::connect(dispatcher.address).await;
        workers.push(tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            loop {
                let n = match worker.stream.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if let Ok(MasterMessage::Task(assignment)) = decode_master_message(&buffer[..n]) {
                    worker
                        .reply(&format!("https://blob/result/{}", assignment.file_name))
                        .await;
                }
            }
        }));
    }

    eventually("all tasks completed", || context.results().len() == 12).await;
    let files: HashSet<String> = context
        .results()
        .iter()
        .map(|r| r.file_name.clone())
        .collect();
    assert_eq!(files.len(), 12);
    assert!(context.pending().is_empty());

    within(dispatcher.server.shutdown()).await;
    for worker in workers {
        within(worker).await.unwrap();
    }
}

#[tokio::test]
async fn test_shutdown_drains_sessions() {
    let dispatcher = start_dispatcher(
        DispatcherConfig {
            idle_interval_ms: 60_000,
            ..fast_config()
        },
        None,
    )
    .await
    .unwrap();

    let mut first = FakeWorker::connect(dispatcher.address).await;
    let mut second = FakeWorker::connect(dispatcher.address).await;
    assert_eq!(first.read_message().await, "NO_TASK");
    assert_eq!(second.read_message().await, "NO_TASK");
    assert_eq!(dispatcher.context().registry().active_count(), 2);

    assert!(within(dispatcher.server.shutdown()).await);
    assert!(!dispatcher.server.shutdown().await);

    assert_eq!(dispatcher.context().registry().active_count(), 0);
    assert_eq!(dispatcher.sink.clear_count(), 1);
    assert_eq!(first.read_message().await, "");
    assert_eq!(second.read_message().await, "");
}

#[tokio::test]
async fn test_poller_drops_malformed_descriptors() {
    let source = Arc::new(InMemoryTaskSource::new());
    source.push("not-a-task");
    source.push("a.jpg,rotate,https://blob/a.jpg");
    source.push("a.jpg,face_detection,https://blob/a.jpg,extra.jpg");
    source.push("b.jpg,face_detection,https://blob/b.jpg");
    let dispatcher = start_dispatcher(fast_config(), Some(source.clone() as Arc<dyn TaskSource>))
        .await
        .unwrap();
    let context = dispatcher.context().clone();

    eventually("source drained", || source.is_empty()).await;
    let pending = context.pending().snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_name(), "b.jpg");

    dispatcher.server.shutdown().await;
}

#[tokio::test]
async fn test_status_api_reports_history() {
    let dispatcher = start_dispatcher(
        DispatcherConfig {
            status_api_bind_address: Some("127.0.0.1:0".to_string()),
            ..fast_config()
        },
        None,
    )
    .await
    .unwrap();
    let api = dispatcher.server.status_api_addr().unwrap();

    let mut worker = FakeWorker::connect(dispatcher.address).await;
    worker.read_message().await;

    let statuses: serde_json::Value = reqwest::get(format!("http://{api}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(statuses[0]["id"], "127.0.0.1");
    assert_eq!(statuses[0]["statuses"][0], "connected");

    let pending: serde_json::Value = reqwest::get(format!("http://{api}/pending"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["pending_tasks"], 0);
    assert_eq!(pending["active_sessions"].as_array().unwrap().len(), 1);

    within(dispatcher.server.shutdown()).await;
}
