//! Document extraction adapter for the Azure prebuilt-invoice model.
//!
//! One upload maps to one analysis call. Whatever happens during that call,
//! [`extract_invoice`] returns an [`ExtractionOutcome`] carrying the measured
//! duration; transport and service errors are turned into a failure
//! diagnostic here and never reach the caller as errors.

use crate::config::AzureConfig;
use crate::error::ExtractionError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const INVOICE_MODEL: &str = "prebuilt-invoice";
const API_VERSION: &str = "2024-11-30";

/// Diagnostic for an analysis that found no invoice in the document.
pub const NO_INVOICE_DETECTED: &str = "No invoice detected";

/// Invoice fields we read from the service, by logical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceField {
    InvoiceId,
    InvoiceDate,
    DueDate,
    InvoiceTotal,
    CurrencyCode,
    SubTotal,
    TotalTax,
    VendorName,
    VendorAddress,
    CustomerName,
}

impl InvoiceField {
    pub const ALL: [InvoiceField; 10] = [
        InvoiceField::InvoiceId,
        InvoiceField::InvoiceDate,
        InvoiceField::DueDate,
        InvoiceField::InvoiceTotal,
        InvoiceField::CurrencyCode,
        InvoiceField::SubTotal,
        InvoiceField::TotalTax,
        InvoiceField::VendorName,
        InvoiceField::VendorAddress,
        InvoiceField::CustomerName,
    ];

    /// Field name in the prebuilt-invoice schema.
    pub fn service_name(self) -> &'static str {
        match self {
            InvoiceField::InvoiceId => "InvoiceId",
            InvoiceField::InvoiceDate => "InvoiceDate",
            InvoiceField::DueDate => "DueDate",
            InvoiceField::InvoiceTotal => "InvoiceTotal",
            InvoiceField::CurrencyCode => "CurrencyCode",
            InvoiceField::SubTotal => "SubTotal",
            InvoiceField::TotalTax => "TotalTax",
            InvoiceField::VendorName => "VendorName",
            InvoiceField::VendorAddress => "VendorAddress",
            InvoiceField::CustomerName => "CustomerName",
        }
    }
}

/// A service field decoded into exactly one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Currency { amount: Decimal, code: Option<String> },
    Date(NaiveDate),
    /// Date that came with a time-of-day component.
    DateTime(NaiveDateTime),
}

impl FieldValue {
    /// Decode one field object from `analyzeResult.documents[].fields`.
    ///
    /// Returns `None` for value-less fields and for shapes we do not
    /// recognise; a bad field never affects its neighbours.
    pub fn decode(obj: &Value) -> Option<FieldValue> {
        let obj = obj.as_object()?;
        let decoded = match obj.get("type").and_then(Value::as_str) {
            Some("string") | Some("phoneNumber") | Some("countryRegion") => text_of(obj.get("valueString")),
            Some("address") => address_of(obj),
            Some("date") => obj.get("valueDate").and_then(date_of),
            Some("time") => text_of(obj.get("valueTime")),
            Some("number") => obj.get("valueNumber").and_then(decimal_of).map(FieldValue::Number),
            Some("integer") => obj.get("valueInteger").and_then(decimal_of).map(FieldValue::Number),
            Some("currency") => obj.get("valueCurrency").and_then(currency_of),
            Some(other) => {
                debug!("unsupported field type {:?}", other);
                None
            }
            None => untyped_value(obj),
        };
        if decoded.is_none() {
            let raw = Value::Object(obj.clone());
            debug!("field without usable value: {}", raw);
        }
        decoded
    }

    pub fn as_text(&self) -> Option<String> {
        let s = match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Currency { amount, .. } => amount.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        };
        Some(s).filter(|s| !s.is_empty())
    }

    /// Currency amounts and bare numbers both become a single decimal.
    pub fn as_amount(&self) -> Option<Decimal> {
        match self {
            FieldValue::Currency { amount, .. } => Some(*amount),
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => parse_decimal(s),
            FieldValue::Date(_) | FieldValue::DateTime(_) => None,
        }
    }

    /// Plain dates and timestamps both become a calendar date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::DateTime(dt) => Some(dt.date()),
            FieldValue::Text(s) => parse_date(s).and_then(|v| v.as_date()),
            FieldValue::Number(_) | FieldValue::Currency { .. } => None,
        }
    }

    pub fn currency_code(&self) -> Option<&str> {
        match self {
            FieldValue::Currency { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

fn text_of(v: Option<&Value>) -> Option<FieldValue> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| FieldValue::Text(s.to_string()))
}

fn address_of(obj: &Map<String, Value>) -> Option<FieldValue> {
    if let Some(content) = text_of(obj.get("content")) {
        return Some(content);
    }
    // No raw content: rebuild from the structured parts.
    let addr = obj.get("valueAddress")?.as_object()?;
    let parts: Vec<&str> = ["streetAddress", "city", "state", "postalCode", "countryRegion"]
        .iter()
        .filter_map(|key| addr.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(FieldValue::Text(parts.join(", ")))
    }
}

fn currency_of(v: &Value) -> Option<FieldValue> {
    let amount = v.get("amount").and_then(decimal_of)?;
    let code = v
        .get("currencyCode")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Some(FieldValue::Currency { amount, code })
}

fn date_of(v: &Value) -> Option<FieldValue> {
    match v {
        Value::String(s) => parse_date(s),
        Value::Object(parts) => {
            let num = |key: &str| parts.get(key).and_then(Value::as_i64);
            let date = NaiveDate::from_ymd_opt(
                i32::try_from(num("year")?).ok()?,
                u32::try_from(num("month")?).ok()?,
                u32::try_from(num("day")?).ok()?,
            )?;
            Some(FieldValue::Date(date))
        }
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<FieldValue> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(FieldValue::Date(d));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(FieldValue::DateTime(dt.naive_local()));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(FieldValue::DateTime)
}

fn decimal_of(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
}

/// Fields from older API versions carry no `type`; take the first value key
/// present.
fn untyped_value(obj: &Map<String, Value>) -> Option<FieldValue> {
    if let Some(v) = obj.get("valueCurrency") {
        return currency_of(v);
    }
    if let Some(v) = obj.get("valueDate") {
        return date_of(v);
    }
    if let Some(v) = obj.get("valueNumber") {
        return decimal_of(v).map(FieldValue::Number);
    }
    if obj.contains_key("valueAddress") {
        return address_of(obj);
    }
    text_of(obj.get("valueString")).or_else(|| text_of(obj.get("content")))
}

/// One analyzed document as returned by the service.
#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    pub fields: Map<String, Value>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeResult {
    pub documents: Vec<RawDocument>,
}

impl AnalyzeResult {
    /// Parse the `analyzeResult` object of a succeeded operation.
    pub fn from_json(result: &Value) -> Result<Self, ExtractionError> {
        let docs = match result.get("documents") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(docs)) => docs,
            Some(other) => {
                return Err(ExtractionError::InvalidResponse(format!(
                    "documents is not an array: {}",
                    other
                )))
            }
        };
        let documents = docs
            .iter()
            .map(|doc| RawDocument {
                fields: doc.get("fields").and_then(Value::as_object).cloned().unwrap_or_default(),
                confidence: doc.get("confidence").and_then(Value::as_f64),
            })
            .collect();
        Ok(Self { documents })
    }
}

/// The external document-analysis call.
pub trait DocumentAnalyzer: Send + Sync {
    fn analyze(&self, document: &[u8]) -> Result<AnalyzeResult, ExtractionError>;
}

/// Azure Document Intelligence client, built once at start-up.
pub struct AzureInvoiceAnalyzer {
    client: Client,
    config: AzureConfig,
}

impl AzureInvoiceAnalyzer {
    pub fn new(config: AzureConfig) -> Result<Self, ExtractionError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn credentials(&self) -> Result<(&str, &str), ExtractionError> {
        match (&self.config.endpoint, &self.config.key) {
            (Some(endpoint), Some(key)) if self.config.is_configured() => {
                Ok((endpoint.trim_end_matches('/'), key.as_str()))
            }
            _ => Err(ExtractionError::NotConfigured),
        }
    }
}

impl DocumentAnalyzer for AzureInvoiceAnalyzer {
    fn analyze(&self, document: &[u8]) -> Result<AnalyzeResult, ExtractionError> {
        let (endpoint, key) = self.credentials()?;
        let url = format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            endpoint, INVOICE_MODEL, API_VERSION
        );

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Content-Type", "application/octet-stream")
            .body(document.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Service {
                status: status.as_u16(),
                body: if body.is_empty() {
                    "Invalid key or endpoint?".to_string()
                } else {
                    body
                },
            });
        }

        let result_url = response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .ok_or(ExtractionError::MissingOperationLocation)?
            .to_string();

        for _ in 0..self.config.max_polls {
            std::thread::sleep(self.config.poll_interval);
            let poll = self
                .client
                .get(&result_url)
                .header("Ocp-Apim-Subscription-Key", key)
                .send()?;
            let status = poll.status();
            if !status.is_success() {
                return Err(ExtractionError::Service {
                    status: status.as_u16(),
                    body: poll.text().unwrap_or_default(),
                });
            }
            let body: Value = poll
                .json()
                .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
            match body.get("status").and_then(Value::as_str).unwrap_or("") {
                "succeeded" => {
                    let result = body
                        .get("analyzeResult")
                        .ok_or_else(|| ExtractionError::InvalidResponse("no analyzeResult".to_string()))?;
                    return AnalyzeResult::from_json(result);
                }
                "failed" => {
                    let message = body
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    return Err(ExtractionError::AnalysisFailed(message.to_string()));
                }
                _ => continue,
            }
        }
        Err(ExtractionError::Timeout(self.config.max_polls))
    }
}

/// Decoded fields of the first invoice in a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedInvoice {
    pub fields: HashMap<InvoiceField, FieldValue>,
    pub confidence: Option<f64>,
}

impl ExtractedInvoice {
    pub fn from_document(doc: &RawDocument) -> Self {
        let fields = InvoiceField::ALL
            .iter()
            .filter_map(|field| {
                let raw = doc.fields.get(field.service_name())?;
                FieldValue::decode(raw).map(|value| (*field, value))
            })
            .collect();
        Self {
            fields,
            confidence: doc.confidence,
        }
    }

    pub fn get(&self, field: InvoiceField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: InvoiceField) -> Option<String> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn amount(&self, field: InvoiceField) -> Option<Decimal> {
        self.get(field).and_then(FieldValue::as_amount)
    }

    pub fn date(&self, field: InvoiceField) -> Option<NaiveDate> {
        self.get(field).and_then(FieldValue::as_date)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Extracted {
        invoice: ExtractedInvoice,
        processing_time: f64,
    },
    Failed {
        message: String,
        processing_time: Option<f64>,
    },
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Extracted { .. })
    }
}

/// Run one analysis and fold every failure into the outcome.
pub fn extract_invoice(analyzer: &dyn DocumentAnalyzer, document: &[u8]) -> ExtractionOutcome {
    let started = Instant::now();
    let result = analyzer.analyze(document);
    let processing_time = started.elapsed().as_secs_f64();

    match result {
        Ok(result) => match result.documents.first() {
            Some(doc) => {
                let invoice = ExtractedInvoice::from_document(doc);
                info!(
                    documents = result.documents.len(),
                    fields = invoice.fields.len(),
                    processing_time,
                    "invoice extracted"
                );
                ExtractionOutcome::Extracted {
                    invoice,
                    processing_time,
                }
            }
            None => {
                info!(processing_time, "analysis returned no documents");
                ExtractionOutcome::Failed {
                    message: NO_INVOICE_DETECTED.to_string(),
                    processing_time: Some(processing_time),
                }
            }
        },
        Err(e) => {
            warn!(processing_time, "invoice extraction failed: {}", e);
            ExtractionOutcome::Failed {
                message: e.to_string(),
                processing_time: Some(processing_time),
            }
        }
    }
}
