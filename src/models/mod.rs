pub mod invoice;

pub use invoice::{
    InvoiceFields, InvoiceRecord, NewInvoiceRecord, RecordStatus, DEFAULT_CURRENCY, PROCESSING_METHOD,
};
