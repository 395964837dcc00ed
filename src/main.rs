fn main() {
    if let Err(e) = counterparty_txcodec::cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
