use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::cors::{Any, CorsLayer},
    tracing::info,
};

use weft_fabric::{AllowAll, Fabric, FilterPipeline};

use crate::{binary::DiscardBinary, state::GatewayState, sweep::run_sweep, ws::handle_connection};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .with_state(app_state)
}

/// Start the gateway HTTP + WebSocket server over a freshly built fabric.
pub async fn start_gateway(bind: &str, port: u16) -> anyhow::Result<()> {
    let config = weft_config::discover_and_load();

    let pipeline = FilterPipeline::with_default_rules(config.violation_log_cap);
    let fabric = Fabric::start(config.clone(), pipeline, Arc::new(AllowAll));
    let state = GatewayState::new(Arc::clone(&fabric), Arc::new(DiscardBinary));

    // Stale-connection sweep shares the fabric's cancellation token so
    // shutdown stops every loop.
    tokio::spawn(run_sweep(
        Arc::clone(&state),
        config.sweep_interval(),
        config.heartbeat_timeout(),
        fabric.cancellation_token(),
    ));

    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("weft gateway v{}", state.version),
        format!(
            "protocol v{}, listening on {}",
            weft_protocol::PROTOCOL_VERSION,
            addr
        ),
        format!(
            "drain {}ms, monitor {}ms, sweep {}ms",
            config.drain_interval_ms, config.monitor_interval_ms, config.sweep_interval_ms
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "protocol": weft_protocol::PROTOCOL_VERSION,
        "connections": state.gateway.client_count().await,
        "channels": state.gateway.fabric.registry.channel_count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway))
}
