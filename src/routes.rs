use crate::error::{DbResult, IngestError, PowerBiError};
use crate::services::ingestion::IngestionService;
use crate::services::powerbi::PowerBiClient;
use crate::services::reporting::ReportingService;
use crate::types::{BiRow, ErrorBody, SummaryResponse, UploadResponse};
use crate::views::{self, DashboardView};
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse, Responder};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{error, warn};

const INDEX_RECENT: usize = 10;
const DASHBOARD_RECENT: usize = 5;

/// Shared state handed to every handler.
pub struct AppState {
    pub ingestion: IngestionService,
    pub reporting: ReportingService,
    pub powerbi: Option<Arc<PowerBiClient>>,
}

/// Mount every route on an app or scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/upload", web::post().to(upload))
        .route("/dashboard", web::get().to(dashboard))
        .route("/dashboard-test", web::get().to(dashboard_test))
        .route("/health", web::get().to(health))
        .service(
            web::scope("/api")
                .wrap(api_cors())
                .route("/summary", web::get().to(api_summary))
                .route("/data", web::get().to(api_data))
                .route("/embed-token", web::get().to(embed_token)),
        );
}

fn api_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET"])
        .allow_any_header()
        .max_age(3600)
}

fn json_error(mut builder: actix_web::HttpResponseBuilder, message: impl Into<String>) -> HttpResponse {
    builder.json(ErrorBody::new(message))
}

fn ingest_error(err: IngestError) -> HttpResponse {
    if err.is_client_error() {
        json_error(HttpResponse::BadRequest(), err.to_string())
    } else {
        error!("upload could not be stored: {}", err);
        json_error(HttpResponse::InternalServerError(), err.to_string())
    }
}

/// Run a store read on the blocking pool.
async fn read_store<T, F>(state: &AppState, read: F) -> Result<T, String>
where
    F: FnOnce(&ReportingService) -> DbResult<T> + Send + 'static,
    T: Send + 'static,
{
    let reporting = state.reporting.clone();
    match web::block(move || read(&reporting)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

pub async fn index(state: web::Data<AppState>) -> HttpResponse {
    match read_store(&state, |r| r.recent(INDEX_RECENT)).await {
        Ok(recent) => HttpResponse::Ok()
            .content_type(ContentType::html())
            .body(views::index(&recent, state.ingestion.allowed_extensions())),
        Err(e) => {
            error!("failed to list invoices: {}", e);
            json_error(HttpResponse::InternalServerError(), e)
        }
    }
}

/// `POST /upload`: multipart form with a single `file` part.
pub async fn upload(state: web::Data<AppState>, mut payload: Multipart) -> HttpResponse {
    let max_bytes = state.ingestion.max_upload_bytes();
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(e) => {
                warn!("malformed multipart body: {}", e);
                break;
            }
        };
        let filename = if field.name() == "file" && upload.is_none() {
            field.content_disposition().get_filename().map(str::to_string)
        } else {
            None
        };
        let Some(filename) = filename else {
            while let Some(chunk) = field.next().await {
                if chunk.is_err() {
                    break;
                }
            }
            continue;
        };
        // Reject on name alone before reading the body.
        if let Err(e) = state.ingestion.validate(&filename, 0) {
            return ingest_error(e);
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return json_error(HttpResponse::BadRequest(), e.to_string()),
            };
            if bytes.len() + chunk.len() > max_bytes {
                return ingest_error(IngestError::TooLarge { max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((filename, bytes));
    }

    let Some((filename, bytes)) = upload else {
        return ingest_error(IngestError::MissingFile);
    };

    let ingestion = state.ingestion.clone();
    match web::block(move || ingestion.ingest(&filename, &bytes)).await {
        Ok(Ok(record)) => HttpResponse::Ok().json(UploadResponse::from(&record)),
        Ok(Err(e)) => ingest_error(e),
        Err(e) => {
            error!("upload worker failed: {}", e);
            json_error(HttpResponse::InternalServerError(), e.to_string())
        }
    }
}

pub async fn dashboard(state: web::Data<AppState>) -> HttpResponse {
    match read_store(&state, |r| r.dashboard(DASHBOARD_RECENT)).await {
        Ok(data) => HttpResponse::Ok()
            .content_type(ContentType::html())
            .body(views::dashboard(&DashboardView::from(data))),
        Err(e) => {
            error!("dashboard failed: {}", e);
            HttpResponse::InternalServerError()
                .content_type(ContentType::html())
                .body(views::dashboard_error(&e))
        }
    }
}

pub async fn dashboard_test() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(views::dashboard(&DashboardView::demo()))
}

pub async fn api_summary(state: web::Data<AppState>) -> HttpResponse {
    match read_store(&state, ReportingService::summary).await {
        Ok(summary) => HttpResponse::Ok().json(SummaryResponse::from(&summary)),
        Err(e) => {
            error!("summary failed: {}", e);
            json_error(HttpResponse::InternalServerError(), e)
        }
    }
}

/// Row feed for the BI dataset.
pub async fn api_data(state: web::Data<AppState>) -> HttpResponse {
    match read_store(&state, ReportingService::records).await {
        Ok(records) => HttpResponse::Ok().json(records.iter().map(BiRow::from).collect::<Vec<_>>()),
        Err(e) => {
            error!("data feed failed: {}", e);
            json_error(HttpResponse::InternalServerError(), e)
        }
    }
}

pub async fn embed_token(state: web::Data<AppState>) -> HttpResponse {
    let Some(client) = state.powerbi.clone() else {
        return json_error(
            HttpResponse::ServiceUnavailable(),
            PowerBiError::NotConfigured.to_string(),
        );
    };
    match web::block(move || client.embed_token()).await {
        Ok(Ok(token)) => HttpResponse::Ok().json(token),
        Ok(Err(e)) => {
            warn!("embed token exchange failed: {}", e);
            json_error(HttpResponse::BadGateway(), e.to_string())
        }
        Err(e) => json_error(HttpResponse::InternalServerError(), e.to_string()),
    }
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}
