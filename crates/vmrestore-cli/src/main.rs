fn main() {
    if let Err(error) = vmrestore_cli::run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
