use tracing_subscriber::{EnvFilter, fmt};

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "wa_graph_import=debug"
    } else {
        "wa_graph_import=info"
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
