use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// Logs go to stdout in compact form, or as JSON lines when `LOG_FORMAT=json`.
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

    // Decide on layers
    let collector = Registry::default().with(env_filter);
    if json {
        let logger = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true);
        tracing::subscriber::set_global_default(collector.with(logger))?;
    } else {
        let logger = tracing_subscriber::fmt::layer()
            .compact()
            .with_line_number(true)
            .with_target(true);
        tracing::subscriber::set_global_default(collector.with(logger))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    #[test]
    fn init_installs_the_global_subscriber_once() {
        super::init().expect("first init succeeds");
        tracing::info!("telemetry initialized");
        assert!(super::init().is_err(), "a second subscriber is rejected");
    }
}
