use crate::models::InvoiceRecord;
use crate::services::reporting::{cost_saving, time_saved, Summary};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

/// Body of `POST /upload` once the upload has been accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub invoice_id: i64,
    /// Canonical fields on success, `{}` on failure.
    pub data: Value,
    pub error: Option<String>,
}

impl From<&InvoiceRecord> for UploadResponse {
    fn from(record: &InvoiceRecord) -> Self {
        let data = record
            .fields()
            .and_then(|fields| serde_json::to_value(fields).ok())
            .unwrap_or_else(|| json!({}));
        Self {
            success: record.is_valid(),
            invoice_id: record.id,
            data,
            error: record.error_message().map(str::to_string),
        }
    }
}

/// Body of `GET /api/summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub total_invoices: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_value: Decimal,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    pub time_saved_hours: f64,
    pub estimated_cost_savings: f64,
}

impl From<&Summary> for SummaryResponse {
    fn from(s: &Summary) -> Self {
        Self {
            total_invoices: s.total_invoices,
            total_value: s.total_value.round_dp(2),
            avg_confidence: round_to(s.avg_confidence, 3),
            avg_processing_time: round_to(s.avg_processing_time, 2),
            time_saved_hours: round_to(s.time_saved_hours, 1),
            estimated_cost_savings: round_to(s.estimated_cost_savings, 2),
        }
    }
}

/// One row of the `GET /api/data` feed consumed by the BI report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BiRow {
    #[serde(rename = "InvoiceID")]
    pub invoice_id: i64,
    pub file_name: String,
    pub vendor_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub processing_time: f64,
    pub confidence_score: f64,
    pub upload_date: String,
    pub is_valid: bool,
    pub time_saved: f64,
    pub cost_saving: f64,
}

impl From<&InvoiceRecord> for BiRow {
    fn from(record: &InvoiceRecord) -> Self {
        let saved = time_saved(record.processing_time());
        Self {
            invoice_id: record.id,
            file_name: record.filename.clone(),
            vendor_name: record.vendor_name().unwrap_or("Unknown").to_string(),
            total_amount: record.total_amount().unwrap_or(Decimal::ZERO),
            processing_time: record.processing_time(),
            confidence_score: record.confidence_score().unwrap_or(0.0),
            upload_date: record.upload_timestamp.to_rfc3339(),
            is_valid: record.is_valid(),
            time_saved: saved,
            cost_saving: round_to(cost_saving(saved), 2),
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
