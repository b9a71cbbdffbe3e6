//! HTTP 入口黑盒测试：绑定临时端口，用 reqwest 走完整链路

#![cfg(feature = "server")]

use std::sync::Arc;
use std::time::Duration;

use carebee::core::DispatchState;
use carebee::dispatch::{Dispatcher, JobQueue, RetryPolicy, StatusReporter};
use carebee::server::{create_router, AppState};
use carebee::store::{NewLogRecord, SqliteLogStore};
use carebee::transport::{MockTransport, SentMessage};
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base_url: String,
    queue: Arc<JobQueue>,
    transport: Arc<MockTransport>,
    store: SqliteLogStore,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// 与生产相同的路由与派发器，只是绑定临时端口
    async fn spawn(transport: MockTransport) -> Self {
        let queue = Arc::new(JobQueue::new());
        let state = Arc::new(DispatchState::new());
        let transport = Arc::new(transport);
        let store = SqliteLogStore::open_in_memory().unwrap();
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&state),
            transport.clone(),
            StatusReporter::new(Arc::new(store.clone())),
            RetryPolicy::default(),
        )
        .with_cooldown(Duration::from_millis(10));
        tokio::spawn(dispatcher.run(shutdown.clone()));

        let app = create_router(Arc::new(AppState::new(
            Arc::clone(&queue),
            transport.clone(),
            Duration::from_secs(2),
        )));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            queue,
            transport,
            store,
            shutdown,
            handle,
        }
    }

    async fn record(&self) -> i64 {
        self.store
            .insert(NewLogRecord {
                recipient: "+15550100".to_string(),
                category: "update".to_string(),
                text: Some("Lunch was great".to_string()),
                media: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn status_eventually(&self, id: i64) -> String {
        for _ in 0..200 {
            let status = self.store.get(id).await.unwrap().unwrap().status;
            if status != "PENDING" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record {id} was never updated");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

#[tokio::test]
async fn test_enqueue_then_delivered_and_recorded() {
    let server = TestServer::spawn(MockTransport::ready()).await;
    let id = server.record().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/send", server.base_url))
        .json(&json!({
            "logId": id,
            "recipientHandle": "+15550100",
            "text": "Lunch was great",
            "mediaItems": [{"mimeType": "image/png", "payload": "data:image/png;base64,aGVsbG8="}],
            "muteFlag": false
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["accepted"], true);
    assert!(body["queueDepth"].as_u64().unwrap() >= 1);

    assert_eq!(server.status_eventually(id).await, "SENT");
    let delivered = server.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(matches!(
        &delivered[0],
        SentMessage::Media { recipient, size: 5, .. } if recipient == "+15550100"
    ));
}

#[tokio::test]
async fn test_not_ready_rejects_without_enqueue() {
    let server = TestServer::spawn(MockTransport::not_ready()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/send", server.base_url))
        .json(&json!({"logId": 7, "recipientHandle": "G1", "text": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["accepted"], false);
    assert!(body["error"].as_str().unwrap().contains("not ready"));
    assert!(server.queue.is_empty());
    assert!(server.transport.attempts().is_empty());

    let status: serde_json::Value = client
        .get(format!("{}/status", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status, json!({"ready": false, "hasPendingChallenge": true}));
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let server = TestServer::spawn(MockTransport::ready()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/send", server.base_url))
        .header("content-type", "application/json")
        .body("{\"recipientHandle\": 5}")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());
    assert!(server.queue.is_empty());
}

#[tokio::test]
async fn test_health_reports_uptime_and_depth() {
    let server = TestServer::spawn(MockTransport::ready()).await;
    let text = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.starts_with("ok uptime="), "{text}");
    assert!(text.contains("queue_depth="), "{text}");
}
