pub mod analysis;
pub mod annotate;
pub mod browse;
pub mod db;
pub mod error;
pub mod ingest;
pub mod pledge;
mod schema;
pub mod server;
pub mod settings;
pub mod utils;

pub use error::{Error, Result};

/// Tracing setup shared by both binaries.
pub fn init_tracing() -> anyhow::Result<()> {
    use tracing::subscriber::set_global_default;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("monitor_feed=info".parse()?))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        );
    set_global_default(subscriber)?;
    Ok(())
}
