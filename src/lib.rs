pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod routes;
pub mod services;
pub mod types;
pub mod views;

use actix_web::{middleware, web, App, HttpServer};
use config::AppConfig;
use error::{AppError, AppResult};
use ocr::{AzureInvoiceAnalyzer, DocumentAnalyzer};
use routes::AppState;
use services::ingestion::IngestionService;
use services::powerbi::PowerBiClient;
use services::reporting::ReportingService;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded in another binary.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Assemble the shared state from configuration. Blocking HTTP clients are
/// built here, outside any async runtime.
pub fn build_state(config: &AppConfig) -> AppResult<AppState> {
    let db = Arc::new(db::Db::new(config.database_path.clone())?);

    if !config.azure.is_configured() {
        warn!("Azure credentials not set; uploads will be stored as failed extractions");
    }
    let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(
        AzureInvoiceAnalyzer::new(config.azure.clone())
            .map_err(|e| AppError::Config(e.to_string()))?,
    );

    let powerbi = match &config.power_bi {
        Some(pb) => Some(Arc::new(
            PowerBiClient::new(pb.clone()).map_err(|e| AppError::Config(e.to_string()))?,
        )),
        None => {
            info!("Power BI not configured; /api/embed-token will return 503");
            None
        }
    };

    Ok(AppState {
        ingestion: IngestionService::new(
            analyzer,
            db.clone(),
            config.allowed_extensions.clone(),
            config.max_upload_bytes,
        ),
        reporting: ReportingService::new(db),
        powerbi,
    })
}

pub fn run() -> AppResult<()> {
    init_logging();

    let config = AppConfig::from_env()?;
    info!(
        bind = %config.bind_address,
        database = %config.database_path.display(),
        azure = config.azure.is_configured(),
        power_bi = config.power_bi.is_some(),
        "starting invoice insights"
    );

    let state = web::Data::new(build_state(&config)?);
    let bind_address = config.bind_address.clone();
    // The blocking HTTP clients must be dropped outside the runtime, so the
    // last handle stays here.
    let server_state = state.clone();

    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(middleware::Logger::default())
                .app_data(server_state.clone())
                .configure(routes::configure)
        })
        .bind(&bind_address)?
        .run()
        .await
    })?;
    drop(state);
    Ok(())
}
