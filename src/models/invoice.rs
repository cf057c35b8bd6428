//! Canonical invoice records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Value of the `processing_method` column for every record.
pub const PROCESSING_METHOD: &str = "azure-form-recognizer";

/// Currency applied when the document carries none.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Business fields of a successful extraction, in canonical form.
///
/// This is also the `data` object returned by `POST /upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    pub invoice_id: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub total_amount: Option<Decimal>,
    pub currency: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub subtotal: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub tax_amount: Option<Decimal>,
    pub vendor_name: Option<String>,
    /// Empty string when the document has no vendor address.
    pub vendor_address: String,
    pub customer_name: Option<String>,
    /// Service confidence in `[0, 1]`.
    pub confidence_score: Option<f64>,
    /// Seconds spent in the analysis call.
    pub processing_time: f64,
}

/// Outcome half of a record: either extracted fields or a diagnostic, never
/// both.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordStatus {
    Valid(InvoiceFields),
    Invalid {
        error_message: String,
        processing_time: f64,
    },
}

impl RecordStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, RecordStatus::Valid(_))
    }

    pub fn processing_time(&self) -> f64 {
        match self {
            RecordStatus::Valid(fields) => fields.processing_time,
            RecordStatus::Invalid { processing_time, .. } => *processing_time,
        }
    }

    pub fn fields(&self) -> Option<&InvoiceFields> {
        match self {
            RecordStatus::Valid(fields) => Some(fields),
            RecordStatus::Invalid { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RecordStatus::Valid(_) => None,
            RecordStatus::Invalid { error_message, .. } => Some(error_message),
        }
    }
}

/// A record ready to be inserted; id and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoiceRecord {
    pub filename: String,
    pub status: RecordStatus,
}

/// A persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
    pub processing_method: String,
    pub status: RecordStatus,
}

impl InvoiceRecord {
    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }

    pub fn processing_time(&self) -> f64 {
        self.status.processing_time()
    }

    pub fn fields(&self) -> Option<&InvoiceFields> {
        self.status.fields()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.status.error_message()
    }

    pub fn vendor_name(&self) -> Option<&str> {
        self.fields().and_then(|f| f.vendor_name.as_deref())
    }

    pub fn total_amount(&self) -> Option<Decimal> {
        self.fields().and_then(|f| f.total_amount)
    }

    pub fn confidence_score(&self) -> Option<f64> {
        self.fields().and_then(|f| f.confidence_score)
    }
}
