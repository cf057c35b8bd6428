use crate::error::{DbError, DbResult};
use crate::models::{
    InvoiceFields, InvoiceRecord, NewInvoiceRecord, RecordStatus, DEFAULT_CURRENCY, PROCESSING_METHOD,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SELECT_COLUMNS: &str = "SELECT id, filename, invoice_id, invoice_date, due_date, total_amount, currency,
        subtotal, tax_amount, vendor_name, vendor_address, customer_name, confidence_score,
        processing_time, upload_timestamp, processing_method, is_valid, error_message
     FROM processed_invoice";

/// Aggregates over every stored record, read under one lock.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceStats {
    pub count: i64,
    pub total_value: Decimal,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    /// Sum over records of `max(0, baseline - processing_time)`.
    pub time_saved_seconds: f64,
}

impl Default for InvoiceStats {
    fn default() -> Self {
        Self {
            count: 0,
            total_value: Decimal::ZERO,
            avg_confidence: 0.0,
            avg_processing_time: 0.0,
            time_saved_seconds: 0.0,
        }
    }
}

/// Everything the dashboard reads, taken under a single lock.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub stats: InvoiceStats,
    pub recent: Vec<InvoiceRecord>,
    pub vendors: Vec<(String, i64)>,
    pub daily: Vec<(NaiveDate, i64)>,
}

/// Append-only invoice store. One connection behind a mutex, so each insert
/// and each aggregate read sees a whole number of completed inserts.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(&db_path)?)
    }

    pub fn in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS processed_invoice (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                invoice_id TEXT,
                invoice_date TEXT,
                due_date TEXT,
                total_amount TEXT,
                currency TEXT,
                subtotal TEXT,
                tax_amount TEXT,
                vendor_name TEXT,
                vendor_address TEXT,
                customer_name TEXT,
                confidence_score REAL CHECK (confidence_score IS NULL OR confidence_score BETWEEN 0 AND 1),
                processing_time REAL NOT NULL CHECK (processing_time >= 0),
                upload_timestamp TEXT NOT NULL,
                processing_method TEXT NOT NULL DEFAULT 'azure-form-recognizer',
                is_valid INTEGER NOT NULL DEFAULT 1,
                error_message TEXT,
                CHECK ((is_valid = 1 AND error_message IS NULL) OR (is_valid = 0 AND error_message IS NOT NULL))
            );
            ",
        )?;

        // Migration 002: index for recent-first listings
        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .unwrap_or(1);
        if current_version < 2 {
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_processed_invoice_uploaded
                    ON processed_invoice(upload_timestamp);
                 UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Insert a record; the store assigns id and upload timestamp.
    pub fn insert(&self, record: &NewInvoiceRecord) -> DbResult<InvoiceRecord> {
        let conn = self.lock()?;

        // Never hand out a timestamp older than one already stored.
        let latest: Option<String> =
            conn.query_row("SELECT MAX(upload_timestamp) FROM processed_invoice", [], |r| r.get(0))?;
        let mut uploaded = Utc::now().trunc_subsecs(6);
        if let Some(latest) = latest {
            let latest = parse_timestamp(&latest)?;
            if latest > uploaded {
                uploaded = latest;
            }
        }

        let fields = record.status.fields();
        let amount = |f: fn(&InvoiceFields) -> Option<Decimal>| fields.and_then(f).map(|d| d.to_string());
        let date = |f: fn(&InvoiceFields) -> Option<NaiveDate>| fields.and_then(f).map(format_date);

        conn.execute(
            "INSERT INTO processed_invoice (filename, invoice_id, invoice_date, due_date, total_amount, currency,
                subtotal, tax_amount, vendor_name, vendor_address, customer_name, confidence_score,
                processing_time, upload_timestamp, processing_method, is_valid, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                record.filename,
                fields.and_then(|f| f.invoice_id.clone()),
                date(|f| f.invoice_date),
                date(|f| f.due_date),
                amount(|f| f.total_amount),
                fields.map(|f| f.currency.clone()),
                amount(|f| f.subtotal),
                amount(|f| f.tax_amount),
                fields.and_then(|f| f.vendor_name.clone()),
                fields.map(|f| f.vendor_address.clone()),
                fields.and_then(|f| f.customer_name.clone()),
                fields.and_then(|f| f.confidence_score),
                record.status.processing_time(),
                format_timestamp(&uploaded),
                PROCESSING_METHOD,
                record.status.is_valid(),
                record.status.error_message(),
            ],
        )?;

        Ok(InvoiceRecord {
            id: conn.last_insert_rowid(),
            filename: record.filename.clone(),
            upload_timestamp: uploaded,
            processing_method: PROCESSING_METHOD.to_string(),
            status: record.status.clone(),
        })
    }

    pub fn get(&self, id: i64) -> DbResult<Option<InvoiceRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), params![id], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// The `limit` most recent uploads, newest first.
    pub fn recent(&self, limit: usize) -> DbResult<Vec<InvoiceRecord>> {
        let conn = self.lock()?;
        recent_on(&conn, limit)
    }

    /// Every record in insertion order.
    pub fn all(&self) -> DbResult<Vec<InvoiceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> DbResult<i64> {
        let conn = self.lock()?;
        count_on(&conn)
    }

    /// Sum of `total_amount`; records without one are skipped.
    pub fn total_amount(&self) -> DbResult<Decimal> {
        let conn = self.lock()?;
        total_amount_on(&conn)
    }

    pub fn average_confidence(&self) -> DbResult<f64> {
        let conn = self.lock()?;
        average_on(&conn, "confidence_score")
    }

    pub fn average_processing_time(&self) -> DbResult<f64> {
        let conn = self.lock()?;
        average_on(&conn, "processing_time")
    }

    /// Aggregates in one consistent read. `baseline_seconds` is the manual
    /// entry time each record's saving is measured against.
    pub fn stats(&self, baseline_seconds: f64) -> DbResult<InvoiceStats> {
        let conn = self.lock()?;
        stats_on(&conn, baseline_seconds)
    }

    pub fn snapshot(
        &self,
        baseline_seconds: f64,
        recent_limit: usize,
        vendor_limit: usize,
        days: usize,
    ) -> DbResult<StoreSnapshot> {
        let conn = self.lock()?;
        Ok(StoreSnapshot {
            stats: stats_on(&conn, baseline_seconds)?,
            recent: recent_on(&conn, recent_limit)?,
            vendors: vendor_counts_on(&conn, vendor_limit)?,
            daily: daily_counts_on(&conn, days)?,
        })
    }

    /// Most frequent vendors, most records first.
    pub fn vendor_counts(&self, limit: usize) -> DbResult<Vec<(String, i64)>> {
        let conn = self.lock()?;
        vendor_counts_on(&conn, limit)
    }

    /// Upload counts for the latest `days` days that had uploads, oldest first.
    pub fn daily_counts(&self, days: usize) -> DbResult<Vec<(NaiveDate, i64)>> {
        let conn = self.lock()?;
        daily_counts_on(&conn, days)
    }
}

fn stats_on(conn: &Connection, baseline_seconds: f64) -> DbResult<InvoiceStats> {
    let time_saved_seconds: f64 = conn.query_row(
        "SELECT COALESCE(SUM(MAX(0.0, ?1 - processing_time)), 0.0) FROM processed_invoice",
        params![baseline_seconds],
        |r| r.get(0),
    )?;
    Ok(InvoiceStats {
        count: count_on(conn)?,
        total_value: total_amount_on(conn)?,
        avg_confidence: average_on(conn, "confidence_score")?,
        avg_processing_time: average_on(conn, "processing_time")?,
        time_saved_seconds,
    })
}

fn recent_on(conn: &Connection, limit: usize) -> DbResult<Vec<InvoiceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY upload_timestamp DESC, id DESC LIMIT ?1",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![limit as i64], row_to_record)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn vendor_counts_on(conn: &Connection, limit: usize) -> DbResult<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT vendor_name, COUNT(*) AS n FROM processed_invoice
         WHERE vendor_name IS NOT NULL AND vendor_name != ''
         GROUP BY vendor_name ORDER BY n DESC, vendor_name LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn daily_counts_on(conn: &Connection, days: usize) -> DbResult<Vec<(NaiveDate, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT substr(upload_timestamp, 1, 10) AS day, COUNT(*) FROM processed_invoice
         GROUP BY day ORDER BY day DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![days as i64], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (day, n) in rows.into_iter().rev() {
        let parsed = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|_| DbError::Corrupt {
            column: "upload_timestamp",
            value: day.clone(),
        })?;
        out.push((parsed, n));
    }
    Ok(out)
}

fn count_on(conn: &Connection) -> DbResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM processed_invoice", [], |r| r.get(0))?)
}

fn total_amount_on(conn: &Connection) -> DbResult<Decimal> {
    let mut stmt = conn.prepare("SELECT total_amount FROM processed_invoice WHERE total_amount IS NOT NULL")?;
    let amounts = stmt.query_map([], |r| r.get::<_, String>(0))?;
    let mut total = Decimal::ZERO;
    for raw in amounts {
        let raw = raw?;
        total += Decimal::from_str(&raw).map_err(|_| DbError::Corrupt {
            column: "total_amount",
            value: raw.clone(),
        })?;
    }
    Ok(total)
}

fn average_on(conn: &Connection, column: &str) -> DbResult<f64> {
    let avg: Option<f64> = conn.query_row(
        &format!("SELECT AVG({}) FROM processed_invoice", column),
        [],
        |r| r.get(0),
    )?;
    Ok(avg.unwrap_or(0.0))
}

fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::Corrupt {
            column: "upload_timestamp",
            value: raw.to_string(),
        })
}

fn text_column<T, E>(row: &Row, idx: usize, parse: impl Fn(&str) -> Result<T, E>) -> rusqlite::Result<Option<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<InvoiceRecord> {
    let decimal = |idx| text_column(row, idx, Decimal::from_str);
    let date = |idx| text_column(row, idx, |s| NaiveDate::parse_from_str(s, "%Y-%m-%d"));

    let processing_time: f64 = row.get(13)?;
    let upload_timestamp = text_column(row, 14, DateTime::parse_from_rfc3339)?
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(rusqlite::Error::InvalidColumnType(14, "upload_timestamp".to_string(), Type::Null))?;

    let status = if row.get::<_, bool>(16)? {
        RecordStatus::Valid(InvoiceFields {
            invoice_id: row.get(2)?,
            invoice_date: date(3)?,
            due_date: date(4)?,
            total_amount: decimal(5)?,
            currency: row
                .get::<_, Option<String>>(6)?
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            subtotal: decimal(7)?,
            tax_amount: decimal(8)?,
            vendor_name: row.get(9)?,
            vendor_address: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            customer_name: row.get(11)?,
            confidence_score: row.get(12)?,
            processing_time,
        })
    } else {
        RecordStatus::Invalid {
            error_message: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
            processing_time,
        }
    };

    Ok(InvoiceRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        upload_timestamp,
        processing_method: row.get(15)?,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn valid(filename: &str, total: Option<&str>, confidence: Option<f64>, seconds: f64) -> NewInvoiceRecord {
        NewInvoiceRecord {
            filename: filename.to_string(),
            status: RecordStatus::Valid(InvoiceFields {
                invoice_id: Some("INV-1".to_string()),
                invoice_date: NaiveDate::from_ymd_opt(2024, 1, 15),
                due_date: NaiveDate::from_ymd_opt(2024, 2, 14),
                total_amount: total.map(|t| Decimal::from_str(t).unwrap()),
                currency: "EUR".to_string(),
                subtotal: Some(Decimal::from_str("100.00").unwrap()),
                tax_amount: Some(Decimal::from_str("23.45").unwrap()),
                vendor_name: Some("Acme".to_string()),
                vendor_address: "1 Main St".to_string(),
                customer_name: Some("Globex".to_string()),
                confidence_score: confidence,
                processing_time: seconds,
            }),
        }
    }

    fn invalid(filename: &str, seconds: f64) -> NewInvoiceRecord {
        NewInvoiceRecord {
            filename: filename.to_string(),
            status: RecordStatus::Invalid {
                error_message: "No invoice detected".to_string(),
                processing_time: seconds,
            },
        }
    }

    #[test]
    fn empty_store_aggregates_to_zero() {
        let db = Db::in_memory().unwrap();
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.total_amount().unwrap(), Decimal::ZERO);
        assert_eq!(db.average_confidence().unwrap(), 0.0);
        assert_eq!(db.average_processing_time().unwrap(), 0.0);
        assert_eq!(db.stats(900.0).unwrap(), InvoiceStats::default());
        assert!(db.recent(5).unwrap().is_empty());
    }

    #[test]
    fn record_round_trips_through_file_database() {
        let dir = tempdir().unwrap();
        let db = Db::new(dir.path().join("nested").join("invoices.db")).unwrap();

        let new = valid("a.pdf", Some("123.45"), Some(0.93), 4.5);
        let inserted = db.insert(&new).unwrap();
        let fetched = db.get(inserted.id).unwrap().unwrap();

        assert_eq!(fetched, inserted);
        assert_eq!(fetched.status, new.status);
        assert_eq!(fetched.processing_method, "azure-form-recognizer");

        let failed = db.insert(&invalid("b.png", 1.5)).unwrap();
        let fetched = db.get(failed.id).unwrap().unwrap();
        assert!(!fetched.is_valid());
        assert_eq!(fetched.error_message(), Some("No invoice detected"));
        assert_eq!(fetched.processing_time(), 1.5);
        assert!(fetched.fields().is_none());

        assert_eq!(db.get(9999).unwrap(), None);
    }

    #[test]
    fn aggregates_match_inserted_values() {
        let db = Db::in_memory().unwrap();
        db.insert(&valid("1.pdf", Some("10.10"), Some(0.9), 100.0)).unwrap();
        db.insert(&valid("2.pdf", None, Some(0.7), 200.0)).unwrap();
        db.insert(&valid("3.pdf", Some("0.20"), None, 300.0)).unwrap();
        db.insert(&invalid("4.pdf", 400.0)).unwrap();

        let stats = db.stats(900.0).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.total_value, Decimal::from_str("10.30").unwrap());
        assert!((stats.avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(stats.avg_processing_time, 250.0);
        assert_eq!(stats.time_saved_seconds, 800.0 + 700.0 + 600.0 + 500.0);
    }

    #[test]
    fn time_saved_never_goes_negative() {
        let db = Db::in_memory().unwrap();
        db.insert(&invalid("slow.pdf", 1200.0)).unwrap();
        db.insert(&invalid("fast.pdf", 300.0)).unwrap();

        assert_eq!(db.stats(900.0).unwrap().time_saved_seconds, 600.0);
    }

    #[test]
    fn snapshot_reads_every_view_together() {
        let db = Db::in_memory().unwrap();
        for i in 0..4 {
            db.insert(&valid(&format!("{}.pdf", i), Some("2.50"), Some(0.8), 10.0)).unwrap();
        }
        db.insert(&invalid("bad.png", 20.0)).unwrap();

        let snap = db.snapshot(900.0, 3, 5, 7).unwrap();
        assert_eq!(snap.stats.count, 5);
        assert_eq!(snap.stats.total_value, Decimal::from(10));
        assert_eq!(snap.recent.len(), 3);
        assert_eq!(snap.recent[0].filename, "bad.png");
        assert_eq!(snap.vendors, vec![("Acme".to_string(), 4)]);
        assert_eq!(snap.daily.iter().map(|(_, n)| n).sum::<i64>(), 5);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let db = Db::in_memory().unwrap();
        for i in 0..7 {
            db.insert(&invalid(&format!("{}.pdf", i), 1.0)).unwrap();
        }
        let recent = db.recent(5).unwrap();
        let names: Vec<&str> = recent.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["6.pdf", "5.pdf", "4.pdf", "3.pdf", "2.pdf"]);

        let timestamps: Vec<_> = db.all().unwrap().iter().map(|r| r.upload_timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn vendor_and_daily_breakdowns() {
        let db = Db::in_memory().unwrap();
        db.insert(&valid("1.pdf", None, None, 1.0)).unwrap();
        db.insert(&valid("2.pdf", None, None, 1.0)).unwrap();
        db.insert(&invalid("3.pdf", 1.0)).unwrap();

        assert_eq!(db.vendor_counts(5).unwrap(), vec![("Acme".to_string(), 2)]);
        let daily = db.daily_counts(7).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].1, 3);
    }

    #[test]
    fn concurrent_inserts_are_all_counted() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Db::new(dir.path().join("invoices.db")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        db.insert(&valid(&format!("{}-{}.pdf", t, i), Some("1.00"), Some(0.5), 2.0))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = db.stats(900.0).unwrap();
        assert_eq!(stats.count, 80);
        assert_eq!(stats.total_value, Decimal::from(80));
        assert_eq!(stats.avg_processing_time, 2.0);
    }
}
