use crate::Result;

/// Initialize tracing for the monitor.
///
/// Default: info for our crates. Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,tmon_core=info,tmon_telegram=info,{service_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("logging init failed: {e}")))?;

    Ok(())
}
