mod ws;

use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use flowelements::{default_providers, standard_registry};
use flowruntime::{
    ElementMetadata, ElementRegistry, FlowRuntime, FlowSession, RuntimeConfig, SessionEnd,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ws::{relay_frames, WsSink};

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Entry of the element catalog
#[derive(Debug, Serialize)]
struct ElementInfo {
    #[serde(rename = "type")]
    element_type: String,
    #[serde(flatten)]
    metadata: Option<ElementMetadata>,
}

fn element_catalog(registry: &ElementRegistry) -> Vec<ElementInfo> {
    registry
        .list_element_types()
        .into_iter()
        .map(|element_type| ElementInfo {
            metadata: registry.get_metadata(&element_type),
            element_type,
        })
        .collect()
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

/// List available element types
#[get("/api/elements")]
async fn list_element_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(element_catalog(data.runtime.registry())))
}

/// Run a flow over a websocket
///
/// The client sends the definition, the inputs and the run config in turn,
/// each acknowledged, and then receives the run's events.
#[get("/ws/flows/{flow_id}")]
async fn flow_socket(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let flow_id = path.into_inner();
    let (res, session, msg_stream) = actix_ws::handle(&req, stream)?;

    info!(flow_id = %flow_id, "WebSocket client connected");

    let source = relay_frames(msg_stream, session.clone());
    let flow_session = FlowSession::new(data.runtime.clone(), flow_id.clone());

    actix_web::rt::spawn(async move {
        let mut sink = WsSink::new(session);
        match flow_session.serve(&mut sink, source).await {
            SessionEnd::Finished(report) => {
                info!(flow_id = %flow_id, run_id = %report.run_id, "Run finished")
            }
            SessionEnd::Aborted(report) => {
                info!(flow_id = %flow_id, run_id = %report.run_id, "Run aborted")
            }
            SessionEnd::Rejected(reason) => {
                info!(flow_id = %flow_id, "Session rejected: {}", reason)
            }
            SessionEnd::Disconnected => info!(flow_id = %flow_id, "Client left before the run"),
            SessionEnd::Crashed(error) => {
                tracing::error!(flow_id = %flow_id, "Run crashed: {}", error)
            }
        }
        sink.close().await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Flow Engine Server");

    let registry = standard_registry(Arc::new(default_providers()));
    let config = RuntimeConfig::from_env();
    info!(
        max_concurrency = config.max_concurrency,
        element_timeout_ms = ?config.element_timeout_ms,
        "Runtime configured"
    );
    let runtime = FlowRuntime::with_config(Arc::new(registry), config);

    info!("✅ Runtime initialized with standard elements");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_element_types)
            .service(flow_socket)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
