use std::path::Path;

use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

use crate::error::Error;

/// Routes `log` and `tracing` output into `<dir>/refract.log`, filtered by
/// `RUST_LOG` (default `info`). GPU crates are held at `warn`.
pub fn init_tracing(dir: impl AsRef<Path>) -> Result<(), Error> {
    // Silence wgpu log spam (https://github.com/gfx-rs/wgpu/issues/3206)
    let mut filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned());
    for loud_crate in ["naga", "wgpu_core", "wgpu_hal"] {
        if !filter.contains(&format!("{loud_crate}=")) {
            filter += &format!(",{loud_crate}=warn");
        }
    }
    let env_filter = EnvFilter::try_new(&filter).map_err(|e| Error::Initialization(format!("RUST_LOG: {e}")))?;

    let writer = tracing_appender::rolling::never(dir.as_ref(), "refract.log").with_max_level(Level::DEBUG);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_max_level(LevelFilter::DEBUG)
        .with_file(true)
        .with_line_number(true)
        .without_time()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| Error::Initialization(format!("tracing: {e}")))?;

    tracing::debug!("logging to {}", dir.as_ref().display());
    Ok(())
}
