//! Turns an extraction outcome into the canonical record. Pure; no I/O.

use crate::models::{InvoiceFields, NewInvoiceRecord, RecordStatus, DEFAULT_CURRENCY};
use crate::ocr::{ExtractedInvoice, ExtractionOutcome, InvoiceField};

/// Amount fields whose embedded currency code may stand in for a missing
/// `CurrencyCode`, in order of preference.
const CURRENCY_CARRIERS: [InvoiceField; 3] = [
    InvoiceField::InvoiceTotal,
    InvoiceField::SubTotal,
    InvoiceField::TotalTax,
];

pub fn canonical_fields(invoice: &ExtractedInvoice, processing_time: f64) -> InvoiceFields {
    let currency = invoice
        .text(InvoiceField::CurrencyCode)
        .or_else(|| {
            CURRENCY_CARRIERS
                .iter()
                .find_map(|f| invoice.get(*f).and_then(|v| v.currency_code()).map(str::to_string))
        })
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    InvoiceFields {
        invoice_id: invoice.text(InvoiceField::InvoiceId),
        invoice_date: invoice.date(InvoiceField::InvoiceDate),
        due_date: invoice.date(InvoiceField::DueDate),
        total_amount: invoice.amount(InvoiceField::InvoiceTotal),
        currency,
        subtotal: invoice.amount(InvoiceField::SubTotal),
        tax_amount: invoice.amount(InvoiceField::TotalTax),
        vendor_name: invoice.text(InvoiceField::VendorName),
        vendor_address: invoice.text(InvoiceField::VendorAddress).unwrap_or_default(),
        customer_name: invoice.text(InvoiceField::CustomerName),
        confidence_score: invoice.confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0)),
        processing_time: sanitize_duration(processing_time),
    }
}

/// Build the record for one upload attempt, successful or not.
pub fn canonical_record(filename: &str, outcome: &ExtractionOutcome) -> NewInvoiceRecord {
    let status = match outcome {
        ExtractionOutcome::Extracted {
            invoice,
            processing_time,
        } => RecordStatus::Valid(canonical_fields(invoice, *processing_time)),
        ExtractionOutcome::Failed {
            message,
            processing_time,
        } => RecordStatus::Invalid {
            error_message: message.clone(),
            processing_time: sanitize_duration(processing_time.unwrap_or(0.0)),
        },
    };
    NewInvoiceRecord {
        filename: filename.to_string(),
        status,
    }
}

fn sanitize_duration(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
