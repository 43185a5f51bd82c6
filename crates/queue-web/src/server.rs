//! Web服务器

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{
    bulk_import, call_next, create_queue, get_current, get_queue, health, list_by_doctor_date,
    list_queues, metrics, skip_queue,
};
use crate::state::AppState;
use crate::ws::queue_socket;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| anyhow::anyhow!("Web server failed: {}", e))?;

        info!("Web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // API路由
        .nest("/api/v1", api_routes())
        // 实时订阅
        .route("/ws/queues", get(queue_socket))
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/queues", post(create_queue).get(list_queues))
        .route("/queues/current", get(get_current))
        .route("/queues/call-next", post(call_next))
        .route("/queues/bulk-import", post(bulk_import))
        .route("/queues/doctor/:doctor_id/:queue_date", get(list_by_doctor_date))
        .route("/queues/:id", get(get_queue))
        .route("/queues/:id/skip", post(skip_queue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use queue_admin::{QueueMetrics, WorkflowConfig};
    use queue_database::MemoryQueueStore;
    use queue_integration::{LogDispatcher, TopicBroadcaster};
    use queue_workflow::{QueueEngine, SideEffects};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        app: Router,
        store: Arc<MemoryQueueStore>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(MemoryQueueStore::new());
        let broadcaster = TopicBroadcaster::default();
        let metrics = QueueMetrics::new().unwrap();
        let (side_effects, _workers) = SideEffects::spawn(
            Arc::new(LogDispatcher),
            Arc::new(broadcaster.clone()),
            metrics.clone(),
        );
        let engine = QueueEngine::new(
            store.clone(),
            store.clone(),
            side_effects,
            metrics,
            &WorkflowConfig::default(),
        );

        TestApp {
            app: create_app(AppState::new(Arc::new(engine), broadcaster)),
            store,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn create_body(doctor_id: Uuid) -> Value {
        json!({
            "registrationId": Uuid::new_v4(),
            "patientId": Uuid::new_v4(),
            "doctorId": doctor_id,
            "queueDate": "2024-10-08"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app();
        let (status, body) = send(&t.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let t = test_app();
        let body = create_body(Uuid::new_v4());

        let (status, record) = send(&t.app, "POST", "/api/v1/queues", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["queueNumber"], 1);
        assert_eq!(record["status"], "WAITING");

        let (status, error) = send(&t.app, "POST", "/api/v1/queues", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["error"], true);
        assert_eq!(error["code"], "CONFLICT_ERROR");
        assert_eq!(error["status"], 409);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_store() {
        let t = test_app();
        let mut body = create_body(Uuid::new_v4());
        body["doctorId"] = json!("not-a-uuid");

        let (status, error) = send(&t.app, "POST", "/api/v1/queues", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "VALIDATION_ERROR");

        let (status, _) = send(&t.app, "POST", "/api/v1/queues", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(t.store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_call_next_current_and_skip() {
        let t = test_app();
        let doctor_id = Uuid::new_v4();
        let partition = json!({"doctorId": doctor_id, "queueDate": "2024-10-08"});
        let current_uri = format!("/api/v1/queues/current?doctorId={}&queueDate=2024-10-08", doctor_id);

        let (status, _) = send(&t.app, "POST", "/api/v1/queues/call-next", Some(partition.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, first) = send(&t.app, "POST", "/api/v1/queues", Some(create_body(doctor_id))).await;
        let (_, second) = send(&t.app, "POST", "/api/v1/queues", Some(create_body(doctor_id))).await;

        let (status, current) = send(&t.app, "GET", &current_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(current.is_null());

        let (status, called) = send(&t.app, "POST", "/api/v1/queues/call-next", Some(partition)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(called["id"], first["id"]);
        assert_eq!(called["status"], "CURRENT");

        let (_, current) = send(&t.app, "GET", &current_uri, None).await;
        assert_eq!(current["id"], first["id"]);

        let skip_first = format!("/api/v1/queues/{}/skip", first["id"].as_str().unwrap());
        let (status, error) = send(&t.app, "POST", &skip_first, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["code"], "STATE_ERROR");

        let skip_second = format!("/api/v1/queues/{}/skip", second["id"].as_str().unwrap());
        let (status, skipped) = send(&t.app, "POST", &skip_second, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(skipped["status"], "SKIPPED");

        let (status, _) = send(&t.app, "POST", &format!("/api/v1/queues/{}/skip", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_and_by_doctor_date() {
        let t = test_app();
        let doctor_id = Uuid::new_v4();
        for _ in 0..3 {
            send(&t.app, "POST", "/api/v1/queues", Some(create_body(doctor_id))).await;
        }

        let uri = format!("/api/v1/queues/doctor/{}/2024-10-08", doctor_id);
        let (status, records) = send(&t.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let numbers: Vec<_> = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["queueNumber"].as_i64().unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let uri = format!(
            "/api/v1/queues?doctorId={}&limit=500&sortBy=queueNumber&sortOrder=desc",
            doctor_id
        );
        let (status, page) = send(&t.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["data"][0]["queueNumber"], 3);

        let (status, error) = send(&t.app, "GET", "/api/v1/queues?sortBy=name", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "VALIDATION_ERROR");

        let (status, _) = send(&t.app, "GET", "/api/v1/queues?page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_by_id_with_populate() {
        let t = test_app();
        let patient = t.store.add_patient("Chen Jing", None).await;
        let doctor = t.store.add_doctor("Liu Yang", None).await;
        let body = json!({
            "registrationId": Uuid::new_v4(),
            "patientId": patient.id,
            "doctorId": doctor.id,
            "queueDate": "2024-10-08T09:15:00+08:00"
        });
        let (_, record) = send(&t.app, "POST", "/api/v1/queues", Some(body)).await;
        let id = record["id"].as_str().unwrap();

        let (status, plain) = send(&t.app, "GET", &format!("/api/v1/queues/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(plain.get("patient").is_none());

        let (status, view) =
            send(&t.app, "GET", &format!("/api/v1/queues/{}?populate=true", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["id"], record["id"]);
        assert_eq!(view["patient"]["name"], "Chen Jing");
        assert_eq!(view["doctor"]["name"], "Liu Yang");

        let (status, _) = send(&t.app, "GET", &format!("/api/v1/queues/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&t.app, "GET", "/api/v1/queues/42", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bulk_import_report() {
        let t = test_app();
        t.store.add_patient("Zhou Min", Some("P-9")).await;
        t.store.add_doctor("Wu Gang", Some("D-9")).await;

        let items = json!([
            {"patientRef": "P-9", "doctorRef": "D-9", "queueNumber": 1, "queueDate": "2024-10-08"},
            {"patientRef": "P-9", "doctorRef": "D-unknown", "queueNumber": 2, "queueDate": "2024-10-08"}
        ]);
        let (status, report) = send(&t.app, "POST", "/api/v1/queues/bulk-import", Some(items)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["total"], 2);
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["results"][1]["success"], false);
        assert!(report["results"][1].get("record").is_none());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let t = test_app();
        send(&t.app, "POST", "/api/v1/queues", Some(create_body(Uuid::new_v4()))).await;

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("queue_transitions_total{operation=\"create\"} 1"));
    }

    #[tokio::test]
    async fn test_queue_socket_validates_partition() {
        let t = test_app();

        let uri = "/ws/queues?doctorId=not-a-uuid&queueDate=2024-10-08";
        let (status, error) = send(&t.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "VALIDATION_ERROR");

        let uri = format!("/ws/queues?doctorId={}", Uuid::new_v4());
        let (status, error) = send(&t.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["code"], "VALIDATION_ERROR");

        // 参数合法但不是升级请求
        let uri = format!("/ws/queues?doctorId={}&queueDate=2024-10-08", Uuid::new_v4());
        let (status, body) = send(&t.app, "GET", &uri, None).await;
        assert!(status.is_client_error());
        assert_ne!(body["code"], "VALIDATION_ERROR");
    }
}
