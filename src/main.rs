fn main() {
    if let Err(err) = tabular_loader::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
