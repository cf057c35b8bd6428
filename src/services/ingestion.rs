//! Upload ingestion: validate, extract, normalize, persist.

use crate::db::Db;
use crate::error::IngestError;
use crate::models::InvoiceRecord;
use crate::normalize::canonical_record;
use crate::ocr::{extract_invoice, DocumentAnalyzer};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::info;

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn unsafe_chars() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static pattern"))
}

/// Reduce an uploaded name to something safe to store and display.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = unsafe_chars().replace_all(&joined, "");
    cleaned.trim_matches(|c: char| c == '.' || c == '_').to_string()
}

/// True when the name has an extension from `allowed` (case-insensitive).
pub fn allowed_file(name: &str, allowed: &[String]) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            allowed.iter().any(|a| *a == ext)
        }
        None => false,
    }
}

/// The only code path that creates invoice records.
#[derive(Clone)]
pub struct IngestionService {
    analyzer: Arc<dyn DocumentAnalyzer>,
    db: Arc<Db>,
    allowed_extensions: Vec<String>,
    max_upload_bytes: usize,
}

impl IngestionService {
    pub fn new(
        analyzer: Arc<dyn DocumentAnalyzer>,
        db: Arc<Db>,
        allowed_extensions: Vec<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            analyzer,
            db,
            allowed_extensions,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Check an upload before any bytes are sent to the analysis service.
    pub fn validate(&self, filename: &str, size: usize) -> Result<(), IngestError> {
        if filename.trim().is_empty() {
            return Err(IngestError::MissingFile);
        }
        if !allowed_file(filename, &self.allowed_extensions) {
            return Err(IngestError::DisallowedExtension(filename.to_string()));
        }
        if size > self.max_upload_bytes {
            return Err(IngestError::TooLarge {
                max_bytes: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Process one upload. Rejections persist nothing; every accepted upload
    /// persists exactly one record, whether extraction worked or not.
    pub fn ingest(&self, filename: &str, document: &[u8]) -> Result<InvoiceRecord, IngestError> {
        self.validate(filename, document.len())?;

        let mut stored_name = secure_filename(filename);
        if stored_name.is_empty() {
            stored_name = "upload".to_string();
        }
        info!(filename = %stored_name, bytes = document.len(), "processing upload");

        let outcome = extract_invoice(self.analyzer.as_ref(), document);
        let record = self.db.insert(&canonical_record(&stored_name, &outcome))?;

        info!(
            id = record.id,
            success = record.is_valid(),
            processing_time = record.processing_time(),
            "invoice stored"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ALLOWED_EXTENSIONS;
    use crate::error::ExtractionError;
    use crate::ocr::{AnalyzeResult, RawDocument, NO_INVOICE_DETECTED};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        calls: AtomicUsize,
        result: fn() -> Result<AnalyzeResult, ExtractionError>,
    }

    impl DocumentAnalyzer for Fake {
        fn analyze(&self, _document: &[u8]) -> Result<AnalyzeResult, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn service(result: fn() -> Result<AnalyzeResult, ExtractionError>) -> (IngestionService, Arc<Fake>, Arc<Db>) {
        let fake = Arc::new(Fake {
            calls: AtomicUsize::new(0),
            result,
        });
        let db = Arc::new(Db::in_memory().unwrap());
        let allowed = ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        let svc = IngestionService::new(fake.clone(), db.clone(), allowed, 1024);
        (svc, fake, db)
    }

    fn acme() -> Result<AnalyzeResult, ExtractionError> {
        Ok(AnalyzeResult {
            documents: vec![RawDocument {
                fields: json!({
                    "VendorName": {"type": "string", "valueString": "Acme"},
                    "InvoiceTotal": {"type": "number", "valueNumber": 123.45}
                })
                .as_object()
                .cloned()
                .unwrap(),
                confidence: Some(0.88),
            }],
        })
    }

    #[test]
    fn disallowed_extension_is_rejected_before_extraction() {
        let (svc, fake, db) = service(acme);
        let err = svc.ingest("invoice.exe", b"MZ").unwrap_err();

        assert!(matches!(err, IngestError::DisallowedExtension(_)));
        assert!(err.is_client_error());
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn empty_name_and_oversized_uploads_are_rejected() {
        let (svc, fake, db) = service(acme);
        assert!(matches!(svc.ingest("", b"x"), Err(IngestError::MissingFile)));
        assert!(matches!(
            svc.ingest("big.pdf", &vec![0u8; 2048]),
            Err(IngestError::TooLarge { max_bytes: 1024 })
        ));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn successful_extraction_defaults_currency() {
        let (svc, fake, db) = service(acme);
        let record = svc.ingest("Invoice.PDF", b"%PDF-1.7").unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert!(record.is_valid());
        assert_eq!(record.error_message(), None);
        let fields = record.fields().unwrap();
        assert_eq!(fields.currency, "USD");
        assert_eq!(fields.total_amount, Some(Decimal::from_str("123.45").unwrap()));
        assert_eq!(fields.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(db.get(record.id).unwrap().unwrap(), record);
    }

    #[test]
    fn zero_documents_still_persists_a_failure_record() {
        let (svc, _fake, db) = service(|| Ok(AnalyzeResult::default()));
        let record = svc.ingest("scan.png", b"\x89PNG").unwrap();

        assert!(!record.is_valid());
        assert_eq!(record.error_message(), Some(NO_INVOICE_DETECTED));
        assert!(record.processing_time() >= 0.0);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn service_errors_are_persisted_as_failures() {
        let (svc, _fake, db) = service(|| Err(ExtractionError::AnalysisFailed("bad file".to_string())));
        let record = svc.ingest("photo.jpeg", b"\xff\xd8").unwrap();

        assert_eq!(record.error_message(), Some("Analysis failed: bad file"));
        assert_eq!(db.recent(1).unwrap()[0].id, record.id);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(secure_filename("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(secure_filename("C:\\scans\\my invoice (1).pdf"), "my_invoice_1.pdf");
        assert_eq!(secure_filename("..pdf"), "pdf");
        assert_eq!(secure_filename("ünïcode.png"), "ncode.png");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let allowed: Vec<String> = ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect();
        assert!(allowed_file("a.JPG", &allowed));
        assert!(allowed_file("archive.tar.pdf", &allowed));
        assert!(!allowed_file("pdf", &allowed));
        assert!(!allowed_file("invoice.exe", &allowed));
        assert!(!allowed_file("invoice.", &allowed));
    }
}
