fn main() {
    if let Err(err) = csv_replicator::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
