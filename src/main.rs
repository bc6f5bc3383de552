fn main() {
    if let Err(err) = csv_map_fields::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
