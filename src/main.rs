// Entry point for the financial document OCR backend

use findoc_ocr::{
    classify::FinancialDocumentClassifier,
    core::{config::Config, errors::OcrServiceError, types::{OcrJob, OcrResponse}},
    service::OcrService,
    utils::load_image_from_path,
};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    ocr: Arc<OcrService>,
    classifier: Arc<FinancialDocumentClassifier>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "findoc_ocr={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== FINANCIAL DOCUMENT OCR SERVICE ===");
    info!(
        "Config: languages={:?} workers={} concurrent_jobs={}",
        config.languages(),
        config.worker_threads(),
        config.max_concurrent_jobs()
    );

    // Load all per-language models before serving; a failed load is fatal
    let ocr = Arc::new(OcrService::new(config.clone()));
    if let Err(e) = ocr.initialize().await {
        error!("OCR initialization failed: {}", e);
        return Err(e.into());
    }

    let classifier = Arc::new(FinancialDocumentClassifier::new()?);

    let state = AppState {
        config: config.clone(),
        ocr: ocr.clone(),
        classifier,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ocr", post(run_ocr))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server starting on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /ocr    - Run OCR on the configured image");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No new connections at this point; let everything already admitted
    // finish before the process exits
    ocr.begin_shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run OCR over the configured image and classify the recognized text
async fn run_ocr(State(state): State<AppState>) -> Result<Json<OcrResponse>, (StatusCode, String)> {
    let start_time = std::time::Instant::now();

    let image = load_image_from_path(state.config.image_path())
        .await
        .map_err(|e| {
            error!("Image load failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Image could not be loaded: {}", e),
            )
        })?;

    let job = OcrJob::new(image, "en");
    let outcome = state.ocr.run(job).await.map_err(|e| {
        let status = match &e {
            OcrServiceError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            OcrServiceError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("OCR job failed: {}", e);
        (status, format!("OCR failed: {}", e))
    })?;

    info!(
        "OCR process time: {:.3}s ({} lines)",
        start_time.elapsed().as_secs_f64(),
        outcome.lines.len()
    );

    let classification = state.classifier.classify(&outcome.joined_text());
    if classification.is_financial {
        info!(
            "The document in {} contains financial content. Found keywords: {:?}",
            classification.language,
            classification.keywords()
        );
    } else {
        info!(
            "The document in {} does not contain financial content.",
            classification.language
        );
    }

    let keywords = classification.keywords();
    Ok(Json(OcrResponse {
        lang: classification.language,
        is_financial: classification.is_financial,
        keywords,
        texts: outcome.texts(),
    }))
}
