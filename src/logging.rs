use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the stderr subscriber. `RUST_LOG` wins over `TACTICALGRADE_LOG`,
/// which wins over the command-line level.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("TACTICALGRADE_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(format!("tacticalgrade={level},sqlx=warn")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
