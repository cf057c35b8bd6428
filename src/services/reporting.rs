//! Savings metrics derived from the invoice store. Nothing here is persisted
//! or cached; every call reads the store again.

use crate::db::{Db, InvoiceStats};
use crate::error::DbResult;
use crate::models::InvoiceRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Assumed manual entry time for one invoice (15 minutes).
pub const BASELINE_SECONDS: f64 = 900.0;

/// Labour cost per hour of manual entry.
pub const HOURLY_RATE: f64 = 15.0;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Seconds saved on one invoice. Never negative.
pub fn time_saved(processing_time: f64) -> f64 {
    (BASELINE_SECONDS - processing_time).max(0.0)
}

/// Labour cost saved for `time_saved` seconds.
pub fn cost_saving(time_saved: f64) -> f64 {
    time_saved / SECONDS_PER_HOUR * HOURLY_RATE
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_invoices: i64,
    pub total_value: Decimal,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    pub time_saved_hours: f64,
    pub estimated_cost_savings: f64,
}

impl Summary {
    pub fn from_stats(stats: &InvoiceStats) -> Self {
        let saved_seconds = stats.time_saved_seconds;
        Self {
            total_invoices: stats.count,
            total_value: stats.total_value,
            avg_confidence: stats.avg_confidence,
            avg_processing_time: stats.avg_processing_time,
            time_saved_hours: saved_seconds / SECONDS_PER_HOUR,
            estimated_cost_savings: cost_saving(saved_seconds),
        }
    }
}

const TOP_VENDORS: usize = 5;
const DAILY_WINDOW: usize = 7;

/// Everything the dashboard page shows.
#[derive(Debug, Clone)]
pub struct DashboardData {
    pub summary: Summary,
    pub recent: Vec<InvoiceRecord>,
    pub vendors: Vec<(String, i64)>,
    pub daily: Vec<(NaiveDate, i64)>,
}

#[derive(Clone)]
pub struct ReportingService {
    db: Arc<Db>,
}

impl ReportingService {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn summary(&self) -> DbResult<Summary> {
        Ok(Summary::from_stats(&self.db.stats(BASELINE_SECONDS)?))
    }

    pub fn recent(&self, limit: usize) -> DbResult<Vec<InvoiceRecord>> {
        self.db.recent(limit)
    }

    /// Every record in insertion order, for the BI data feed.
    pub fn records(&self) -> DbResult<Vec<InvoiceRecord>> {
        self.db.all()
    }

    /// Cards and tables all come from the same store snapshot.
    pub fn dashboard(&self, recent_limit: usize) -> DbResult<DashboardData> {
        let snap = self
            .db
            .snapshot(BASELINE_SECONDS, recent_limit, TOP_VENDORS, DAILY_WINDOW)?;
        Ok(DashboardData {
            summary: Summary::from_stats(&snap.stats),
            recent: snap.recent,
            vendors: snap.vendors,
            daily: snap.daily,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewInvoiceRecord, RecordStatus};

    #[test]
    fn time_saved_is_clamped_at_zero() {
        assert_eq!(time_saved(0.0), 900.0);
        assert_eq!(time_saved(12.5), 887.5);
        assert_eq!(time_saved(900.0), 0.0);
        assert_eq!(time_saved(1800.0), 0.0);
    }

    #[test]
    fn cost_saving_uses_hourly_rate() {
        assert_eq!(cost_saving(3600.0), 15.0);
        assert_eq!(cost_saving(0.0), 0.0);
    }

    #[test]
    fn summary_over_three_records() {
        let db = Arc::new(Db::in_memory().unwrap());
        for seconds in [100.0, 200.0, 300.0] {
            db.insert(&NewInvoiceRecord {
                filename: "x.pdf".to_string(),
                status: RecordStatus::Invalid {
                    error_message: "No invoice detected".to_string(),
                    processing_time: seconds,
                },
            })
            .unwrap();
        }
        let reporting = ReportingService::new(db.clone());
        let summary = reporting.summary().unwrap();

        assert_eq!(summary.total_invoices, 3);
        assert_eq!(summary.avg_processing_time, 200.0);
        let per_record: Vec<f64> = reporting
            .records()
            .unwrap()
            .iter()
            .map(|r| time_saved(r.processing_time()))
            .collect();
        assert_eq!(per_record, vec![800.0, 700.0, 600.0]);
        assert!((summary.time_saved_hours - 2100.0 / 3600.0).abs() < 1e-9);
        assert!((summary.estimated_cost_savings - 8.75).abs() < 1e-9);
    }

    #[test]
    fn empty_store_summary_is_all_zero() {
        let reporting = ReportingService::new(Arc::new(Db::in_memory().unwrap()));
        let summary = reporting.summary().unwrap();
        assert_eq!(summary.total_invoices, 0);
        assert_eq!(summary.total_value, Decimal::ZERO);
        assert_eq!(summary.time_saved_hours, 0.0);
        assert_eq!(summary.estimated_cost_savings, 0.0);
    }

    #[test]
    fn dashboard_cards_agree_with_tables() {
        let db = Arc::new(Db::in_memory().unwrap());
        for (i, seconds) in [30.0, 60.0, 1000.0].into_iter().enumerate() {
            db.insert(&NewInvoiceRecord {
                filename: format!("{}.pdf", i),
                status: RecordStatus::Invalid {
                    error_message: "No invoice detected".to_string(),
                    processing_time: seconds,
                },
            })
            .unwrap();
        }
        let data = ReportingService::new(db).dashboard(2).unwrap();

        assert_eq!(data.summary.total_invoices, 3);
        assert_eq!(data.recent.len(), 2);
        assert_eq!(data.recent[0].filename, "2.pdf");
        assert!(data.vendors.is_empty());
        assert_eq!(data.daily.iter().map(|(_, n)| n).sum::<i64>(), data.summary.total_invoices);
        assert!((data.summary.time_saved_hours - (870.0 + 840.0) / 3600.0).abs() < 1e-9);
    }
}
