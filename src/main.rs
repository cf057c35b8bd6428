fn main() {
    if let Err(e) = invoice_insights_lib::run() {
        eprintln!("invoice-insights: {}", e);
        std::process::exit(1);
    }
}
