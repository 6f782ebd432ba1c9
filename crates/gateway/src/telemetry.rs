//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use nomad_core::{AppConfig, LogFormat};

use crate::GatewayError;

/// Install the global fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init(config: &AppConfig) -> Result<(), GatewayError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| GatewayError::Telemetry(e.to_string()))?;

    tracing::info!("Logging initialized ({:?}, level {})", config.log_format, config.log_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = AppConfig { log_level: "debug".into(), ..Default::default() };
        let _ = init(&config);
        assert!(matches!(init(&config), Err(GatewayError::Telemetry(_))));
    }
}
