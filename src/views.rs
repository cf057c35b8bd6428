//! Server-rendered HTML pages.

use crate::models::InvoiceRecord;
use crate::services::reporting::DashboardData;
use crate::types::round_to;
use html_escape::{encode_double_quoted_attribute, encode_text};
use rust_decimal::Decimal;
use std::fmt::Write;
use std::str::FromStr;

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse;width:100%}\
th,td{border-bottom:1px solid #ddd;padding:.4rem;text-align:left}\
.cards{display:flex;gap:1rem;margin-bottom:1.5rem}\
.card{border:1px solid #ccc;border-radius:6px;padding:1rem;min-width:10rem}\
.card b{display:block;font-size:1.4rem}\
.ok{color:#1a7f37}.err{color:#cf222e}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
         <nav><a href=\"/\">Upload</a> | <a href=\"/dashboard\">Dashboard</a></nav>\n\
         <h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = encode_text(title),
        style = STYLE,
    )
}

fn records_table(records: &[InvoiceRecord]) -> String {
    if records.is_empty() {
        return "<p>No invoices processed yet.</p>\n".to_string();
    }
    let mut html = String::from(
        "<table>\n<tr><th>ID</th><th>File</th><th>Vendor</th><th>Total</th>\
         <th>Confidence</th><th>Processing (s)</th><th>Uploaded</th><th>Status</th></tr>\n",
    );
    for record in records {
        let total = record
            .fields()
            .and_then(|f| f.total_amount.map(|t| format!("{} {}", t.round_dp(2), encode_text(&f.currency))))
            .unwrap_or_default();
        let confidence = record
            .confidence_score()
            .map(|c| format!("{:.0}%", c * 100.0))
            .unwrap_or_default();
        let status = match record.error_message() {
            None => "<span class=\"ok\">OK</span>".to_string(),
            Some(message) => format!("<span class=\"err\">{}</span>", encode_text(message)),
        };
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td><td>{}</td></tr>",
            record.id,
            encode_text(&record.filename),
            encode_text(record.vendor_name().unwrap_or("")),
            total,
            confidence,
            record.processing_time(),
            record.upload_timestamp.format("%Y-%m-%d %H:%M"),
            status,
        );
    }
    html.push_str("</table>\n");
    html
}

/// `GET /`: upload form plus the latest records.
pub fn index(recent: &[InvoiceRecord], allowed_extensions: &[String]) -> String {
    let accept = allowed_extensions
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(",");
    let mut body = String::new();
    let _ = write!(
        body,
        "<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" accept=\"{}\">\n\
         <button type=\"submit\">Upload invoice</button>\n</form>\n\
         <h2>Recent invoices</h2>\n",
        encode_double_quoted_attribute(&accept)
    );
    body.push_str(&records_table(recent));
    page("Invoice Insights", &body)
}

/// Figures shown on the dashboard page, independent of where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub total_invoices: i64,
    pub total_value: Decimal,
    pub avg_confidence: f64,
    pub time_saved_hours: f64,
    pub estimated_cost_savings: f64,
    pub recent: Vec<InvoiceRecord>,
    pub vendors: Vec<(String, i64)>,
    pub daily: Vec<(String, i64)>,
}

impl From<DashboardData> for DashboardView {
    fn from(data: DashboardData) -> Self {
        Self {
            total_invoices: data.summary.total_invoices,
            total_value: data.summary.total_value,
            avg_confidence: data.summary.avg_confidence,
            time_saved_hours: data.summary.time_saved_hours,
            estimated_cost_savings: data.summary.estimated_cost_savings,
            recent: data.recent,
            vendors: data.vendors,
            daily: data
                .daily
                .into_iter()
                .map(|(day, n)| (day.format("%m/%d").to_string(), n))
                .collect(),
        }
    }
}

impl DashboardView {
    /// Fixed sample figures for previewing the layout without a store.
    pub fn demo() -> Self {
        let time_saved_hours = 8.5;
        Self {
            total_invoices: 25,
            total_value: Decimal::from_str("45750.50").unwrap_or_default(),
            avg_confidence: 0.94,
            time_saved_hours,
            estimated_cost_savings: time_saved_hours * crate::services::reporting::HOURLY_RATE,
            recent: Vec::new(),
            vendors: [("Microsoft", 8), ("Amazon", 6), ("Google", 5), ("Adobe", 3)]
                .into_iter()
                .map(|(name, n)| (name.to_string(), n))
                .collect(),
            daily: [("12/18", 3), ("12/19", 5), ("12/20", 7), ("12/21", 4)]
                .into_iter()
                .map(|(day, n)| (day.to_string(), n))
                .collect(),
        }
    }
}

fn counts_table(heading: &str, label: &str, rows: &[(String, i64)]) -> String {
    let mut html = format!("<h2>{}</h2>\n", encode_text(heading));
    if rows.is_empty() {
        html.push_str("<p>No data.</p>\n");
        return html;
    }
    let _ = writeln!(html, "<table>\n<tr><th>{}</th><th>Invoices</th></tr>", encode_text(label));
    for (key, count) in rows {
        let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", encode_text(key), count);
    }
    html.push_str("</table>\n");
    html
}

/// `GET /dashboard` and `GET /dashboard-test`.
pub fn dashboard(view: &DashboardView) -> String {
    let mut body = String::from("<div class=\"cards\">\n");
    let cards = [
        ("Invoices processed", view.total_invoices.to_string()),
        ("Total value", format!("{:.2}", view.total_value.round_dp(2))),
        ("Average confidence", format!("{:.1}%", view.avg_confidence * 100.0)),
        ("Time saved", format!("{} h", round_to(view.time_saved_hours, 1))),
        ("Estimated savings", format!("{:.2}", view.estimated_cost_savings)),
    ];
    for (label, value) in cards {
        let _ = writeln!(body, "<div class=\"card\">{}<b>{}</b></div>", label, encode_text(&value));
    }
    body.push_str("</div>\n<h2>Recent invoices</h2>\n");
    body.push_str(&records_table(&view.recent));
    body.push_str(&counts_table("Top vendors", "Vendor", &view.vendors));
    body.push_str(&counts_table("Daily uploads", "Day", &view.daily));
    page("Invoice Dashboard", &body)
}

/// Inline error page used when the dashboard cannot be built.
pub fn dashboard_error(message: &str) -> String {
    format!("Dashboard error: {}", encode_text(message))
}
