use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_channel, alert_history, cancel_migration, create_migration, create_rule, delete_rule,
    disable_rule, enable_rule, execute_migration, get_migration, get_rule, health_check,
    list_channels, list_migrations, list_rules, migration_progress, reset_migration,
    rule_history, run_rule, scheduler_status, start_scheduler, stop_scheduler, AppState,
};
use crate::alerts::{AlertDispatcher, LogChannel};
use crate::gateway::{DiffGateway, MemoryGateway, RemoteGateway};
use crate::migration::{MigrationOrchestrator, MigrationTaskStore, SqlExecutor};
use crate::monitor::{
    Monitor, MonitorScheduler, RuleStore, SchedulerConfig, DEFAULT_HISTORY_LIMIT,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// External diff service; the in-memory gateway is used when unset
    pub gateway_url: Option<String>,
    pub history_limit: usize,
    pub reconcile_interval_ms: u64,
    /// Register a log channel so alerts always reach the service log
    pub log_alerts: bool,
    /// Start the scheduler together with the server
    pub start_scheduler: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            gateway_url: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            reconcile_interval_ms: 1000,
            log_alerts: true,
            start_scheduler: true,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Rule management
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:name", get(get_rule).delete(delete_rule))
        .route("/rules/:name/enable", post(enable_rule))
        .route("/rules/:name/disable", post(disable_rule))
        .route("/rules/:name/run", post(run_rule))
        .route("/rules/:name/history", get(rule_history))
        // Scheduler
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        // Alerts
        .route("/alerts/channels", get(list_channels).post(add_channel))
        .route("/alerts/history", get(alert_history))
        // Migrations
        .route("/migrations", get(list_migrations).post(create_migration))
        .route("/migrations/:id", get(get_migration))
        .route("/migrations/:id/progress", get(migration_progress))
        .route("/migrations/:id/execute", post(execute_migration))
        .route("/migrations/:id/cancel", post(cancel_migration))
        .route("/migrations/:id/reset", post(reset_migration))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Wire the monitor, scheduler and migration orchestrator together
pub fn build_state(config: &ServerConfig) -> AppState {
    let (gateway, executor): (Arc<dyn DiffGateway>, Arc<dyn SqlExecutor>) =
        match &config.gateway_url {
            Some(url) => {
                tracing::info!("Using remote diff service at {}", url);
                let remote = Arc::new(RemoteGateway::new(url.clone()));
                (remote.clone() as Arc<dyn DiffGateway>, remote as Arc<dyn SqlExecutor>)
            }
            None => {
                tracing::info!("No diff service configured, using in-memory gateway");
                let memory = Arc::new(MemoryGateway::new());
                (memory.clone() as Arc<dyn DiffGateway>, memory as Arc<dyn SqlExecutor>)
            }
        };

    let dispatcher = Arc::new(AlertDispatcher::new());
    if config.log_alerts {
        // Fresh dispatcher, the name cannot clash
        let _ = dispatcher.add_channel(Arc::new(LogChannel::new()));
    }

    let monitor = Arc::new(Monitor::new(
        Arc::new(RuleStore::with_history_limit(config.history_limit)),
        Arc::clone(&gateway),
        dispatcher,
    ));
    let scheduler = Arc::new(MonitorScheduler::with_config(
        Arc::clone(&monitor),
        SchedulerConfig {
            reconcile_interval: Duration::from_millis(config.reconcile_interval_ms.max(10)),
        },
    ));
    let migrations = Arc::new(MigrationOrchestrator::new(
        Arc::new(MigrationTaskStore::new()),
        gateway,
        executor,
    ));

    AppState {
        monitor,
        scheduler,
        migrations,
    }
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(build_state(&config));

    if config.start_scheduler {
        state.scheduler.start().await;
    }

    // Build router
    let app = build_router(Arc::clone(&state));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting driftwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state.scheduler)))
        .await?;

    tracing::info!("driftwatch server stopped");
    Ok(())
}

async fn shutdown_signal(scheduler: Arc<MonitorScheduler>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping scheduler...");
    scheduler.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn create_test_app() -> (Arc<AppState>, Router) {
        let state = Arc::new(build_state(&ServerConfig::default()));
        (Arc::clone(&state), build_router(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn row_count_rule(name: &str) -> Value {
        json!({
            "name": name,
            "kind": "row_count",
            "source": {"database": "mysql://a", "table": "orders"},
            "target": {"database": "postgresql://b", "table": "orders"},
            "threshold": {"kind": "row_count_diff", "operator": ">", "value": 0}
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_state, app) = create_test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduler_running"], false);
    }

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let (_state, app) = create_test_app();

        let (status, _) = send(&app, "POST", "/rules", Some(row_count_rule("orders"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "POST", "/rules", Some(row_count_rule("orders"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("orders"));

        let (status, body) = send(&app, "GET", "/rules", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rules"].as_array().unwrap().len(), 1);

        // Tables do not exist in the empty in-memory gateway: a failed run
        let (status, body) = send(&app, "POST", "/rules/orders/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["triggered"], false);

        let (status, body) = send(&app, "GET", "/rules/orders/history?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "POST", "/rules/orders/disable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);

        let (status, body) = send(&app, "GET", "/rules/orders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rule"]["enabled"], false);
        assert_eq!(body["last_result"]["success"], false);

        let (status, _) = send(&app, "DELETE", "/rules/orders", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "POST", "/rules/orders/run", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let (_state, app) = create_test_app();
        let mut rule = row_count_rule("bad");
        rule["schedule"] = json!("61 * * * *");
        let (status, body) = send(&app, "POST", "/rules", Some(rule)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid rule"));
    }

    #[tokio::test]
    async fn test_scheduler_start_stop() {
        let (state, app) = create_test_app();
        let (_, body) = send(&app, "POST", "/scheduler/start", None).await;
        assert_eq!(body["changed"], true);
        assert!(state.scheduler.is_running().await);

        let (_, body) = send(&app, "GET", "/scheduler", None).await;
        assert_eq!(body["running"], true);

        let (_, body) = send(&app, "POST", "/scheduler/stop", None).await;
        assert_eq!(body["changed"], true);
        let (_, body) = send(&app, "POST", "/scheduler/stop", None).await;
        assert_eq!(body["changed"], false);
    }

    #[tokio::test]
    async fn test_alert_channels() {
        let (_state, app) = create_test_app();
        let (_, body) = send(&app, "GET", "/alerts/channels", None).await;
        assert_eq!(body["channels"], json!(["log"]));

        let channel = json!({"kind": "webhook", "name": "ops", "options": {"url": "http://127.0.0.1:9/hook"}});
        let (status, body) = send(&app, "POST", "/alerts/channels", Some(channel.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "ops");

        let (status, _) = send(&app, "POST", "/alerts/channels", Some(channel)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/alerts/channels",
            Some(json!({"kind": "email", "options": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "GET", "/alerts/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["events"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migration_lifecycle() {
        let (state, app) = create_test_app();
        let task = json!({
            "task_id": "m1",
            "source": {"database": "mysql://a", "table": "t"},
            "target": {"database": "postgresql://b", "table": "t"},
            "scripts": [{"inline": "UPDATE t SET v = 1"}],
            "validate_after_migration": false
        });

        let (status, body) = send(&app, "POST", "/migrations", Some(task.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["state"], "pending");

        let (status, _) = send(&app, "POST", "/migrations", Some(task)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "POST", "/migrations/m1/execute", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // Wait for the background run
        for _ in 0..100 {
            let done = state
                .migrations
                .progress("m1")
                .map(|p| p.state.is_terminal())
                .unwrap_or(false);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (status, body) = send(&app, "GET", "/migrations/m1/progress", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "completed");
        assert_eq!(body["progress_percent"], 100.0);

        let (status, _) = send(&app, "POST", "/migrations/m1/execute", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&app, "POST", "/migrations/m1/cancel", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "GET", "/migrations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][0]["task_id"], "m1");

        let (status, _) = send(&app, "GET", "/migrations/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_pending_then_reset() {
        let (_state, app) = create_test_app();
        let task = json!({
            "task_id": "m2",
            "source": {"database": "mysql://a", "table": "t"},
            "target": {"database": "mysql://b", "table": "t"}
        });
        send(&app, "POST", "/migrations", Some(task)).await;

        let (status, body) = send(&app, "POST", "/migrations/m2/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "cancelled");
        assert_eq!(body["cancel_requested"], false);

        let (status, body) = send(&app, "POST", "/migrations/m2/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "pending");
    }

    #[tokio::test]
    async fn test_invalid_migration_rejected() {
        let (_state, app) = create_test_app();
        let task = json!({
            "task_id": "m3",
            "source": {"database": "mysql://a", "table": "t"},
            "target": {"database": "mysql://b", "table": "t"},
            "validation_threshold": -5.0
        });
        let (status, _) = send(&app, "POST", "/migrations", Some(task)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
