fn main() {
    if let Err(err) = wa_graph_import::cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
