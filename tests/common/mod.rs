//! Test utilities: in-memory app, mock driver, loopback ship server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use bay::api::{AppState, create_router};
use bay::config::Settings;
use bay::db::Database;
use bay::driver::spec::validate_memory_for_kubernetes;
use bay::driver::{ContainerDriver, ContainerInfo, DriverError, DriverResult};
use bay::history::HistoryRepository;
use bay::session::SessionRepository;
use bay::ship::models::ShipSpec;
use bay::ship::{ShipClient, ShipRepository, ShipService};

pub const TOKEN: &str = "test-token";

/// Driver that fabricates containers and points every endpoint at the
/// loopback ship server.
pub struct MockDriver {
    endpoint: String,
    created: AtomicUsize,
    running: Mutex<HashSet<String>>,
    data: Mutex<HashSet<String>>,
    /// Apply the Kubernetes memory-unit rules in validate_spec.
    kubernetes_semantics: bool,
}

impl MockDriver {
    pub fn new(ship_addr: SocketAddr) -> Self {
        Self {
            endpoint: ship_addr.to_string(),
            created: AtomicUsize::new(0),
            running: Mutex::new(HashSet::new()),
            data: Mutex::new(HashSet::new()),
            kubernetes_semantics: false,
        }
    }

    pub fn kubernetes(ship_addr: SocketAddr) -> Self {
        Self {
            kubernetes_semantics: true,
            ..Self::new(ship_addr)
        }
    }

    pub fn create_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn mark_dead(&self, container_id: &str) {
        self.running.lock().await.remove(container_id);
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    fn validate_spec(&self, spec: &ShipSpec) -> DriverResult<()> {
        if self.kubernetes_semantics {
            if let Some(ref memory) = spec.memory {
                validate_memory_for_kubernetes(memory)?;
            }
            if let Some(ref disk) = spec.disk {
                validate_memory_for_kubernetes(disk)?;
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        ship_id: &str,
        _ttl: i64,
        _spec: &ShipSpec,
    ) -> DriverResult<ContainerInfo> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let container_id = format!("mock-container-{n}");
        self.running.lock().await.insert(container_id.clone());
        self.data.lock().await.insert(ship_id.to_string());
        Ok(ContainerInfo {
            container_id,
            endpoint: self.endpoint.clone(),
        })
    }

    async fn stop(&self, container_id: &str) -> DriverResult<()> {
        self.running.lock().await.remove(container_id);
        Ok(())
    }

    async fn data_exists(&self, ship_id: &str) -> bool {
        self.data.lock().await.contains(ship_id)
    }

    async fn logs(&self, container_id: &str, _tail: Option<u32>) -> DriverResult<String> {
        if self.running.lock().await.contains(container_id) {
            Ok(format!("container {container_id} log tail\n"))
        } else {
            Err(DriverError::NotFound(container_id.to_string()))
        }
    }

    async fn is_running(&self, container_id: &str) -> DriverResult<bool> {
        Ok(self.running.lock().await.contains(container_id))
    }
}

async fn mock_exec(Json(body): Json<Value>) -> Json<Value> {
    let exec_type = body.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let payload = body.get("payload").cloned().unwrap_or_else(|| json!({}));

    let data = match exec_type {
        "shell/exec" => {
            let command = payload.get("command").and_then(|c| c.as_str()).unwrap_or("");
            let stdout = command
                .strip_prefix("echo ")
                .map(|rest| format!("{rest}\n"))
                .unwrap_or_default();
            json!({"stdout": stdout, "stderr": "", "exit_code": 0})
        }
        "ipython/exec" => {
            let code = payload.get("code").and_then(|c| c.as_str()).unwrap_or("");
            let output = if code == "print(2+2)" { "4\n" } else { "" };
            json!({"output": output, "status": "ok"})
        }
        _ => json!({}),
    };

    Json(json!({
        "success": true,
        "data": data,
        "error": null,
        "execution_time_ms": 1,
    }))
}

/// PTY stand-in: acknowledges resize control messages, echoes the rest.
async fn mock_term(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_mock_term)
}

async fn handle_mock_term(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            WsMessage::Text(text) => {
                let reply = match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(v) if v.get("type").and_then(|t| t.as_str()) == Some("resize") => {
                        format!(
                            "screen resized to {}x{}",
                            v["cols"].as_u64().unwrap_or(0),
                            v["rows"].as_u64().unwrap_or(0)
                        )
                    }
                    _ => text.to_string(),
                };
                if socket.send(WsMessage::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            WsMessage::Binary(data) => {
                if socket.send(WsMessage::Binary(data)).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

/// Serve a minimal stand-in for the in-container ship service.
pub async fn spawn_mock_ship() -> SocketAddr {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/exec", post(mock_exec))
        .route(
            "/upload",
            post(|| async { Json(json!({"success": true, "file_path": "/home/agent/upload"})) }),
        )
        .route("/download", get(|| async { "mock-file-content" }))
        .route("/logs", get(|| async { "ship service log tail\n" }))
        .route("/term", get(mock_term));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock ship");
    let addr = listener.local_addr().expect("mock ship addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

pub struct TestHarness {
    pub router: Router,
    pub service: Arc<ShipService>,
    pub settings: Arc<Settings>,
    pub driver: Arc<MockDriver>,
}

fn test_settings() -> Settings {
    Settings {
        access_token: TOKEN.to_string(),
        warm_pool_enabled: false,
        ship_health_check_timeout: 5,
        ship_health_check_interval: 1,
        ..Settings::default()
    }
}

/// Build the full app over an in-memory store and a mock driver.
pub async fn harness_with(customize: impl FnOnce(&mut Settings)) -> TestHarness {
    let mut settings = test_settings();
    customize(&mut settings);
    let ship_addr = spawn_mock_ship().await;
    let driver = Arc::new(MockDriver::new(ship_addr));
    harness_with_driver(settings, driver).await
}

/// Same, with Kubernetes spec semantics on the mock driver.
pub async fn kubernetes_harness() -> TestHarness {
    let settings = test_settings();
    let ship_addr = spawn_mock_ship().await;
    let driver = Arc::new(MockDriver::kubernetes(ship_addr));
    harness_with_driver(settings, driver).await
}

async fn harness_with_driver(settings: Settings, driver: Arc<MockDriver>) -> TestHarness {
    let settings = Arc::new(settings);
    let db = Database::ephemeral().await.expect("in-memory database");

    let service = Arc::new(ShipService::new(
        ShipRepository::new(db.pool().clone()),
        SessionRepository::new(db.pool().clone()),
        HistoryRepository::new(db.pool().clone()),
        driver.clone() as Arc<dyn ContainerDriver>,
        ShipClient::new(&settings),
        settings.clone(),
    ));

    let router = create_router(AppState::new(service.clone(), settings.clone()));

    TestHarness {
        router,
        service,
        settings,
        driver,
    }
}

pub async fn harness() -> TestHarness {
    harness_with(|_| {}).await
}
