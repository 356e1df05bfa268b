//! Builds the concrete collaborators from configuration.

use std::sync::Arc;

use anyhow::Context;
use bandwatch_core::{Config, LinkConnector, LogNotifier, Notifier, NtfyNotifier};
use tracing::info;

/// ntfy when a topic is configured, otherwise log-only.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notifier.topic {
        Some(topic) => {
            let notifier = NtfyNotifier::new(
                &config.notifier.server,
                topic,
                config.session.notify_timeout(),
            )
            .context("failed to build ntfy notifier")?;
            info!(url = notifier.url(), "alerts go to ntfy");
            Ok(Arc::new(notifier))
        }
        None => {
            info!("no ntfy topic configured; alerts are only logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// The BlueZ connector for the configured band.
///
/// # Errors
///
/// Returns an error if the device address does not parse.
#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
pub fn build_connector(config: &Config) -> anyhow::Result<Arc<dyn LinkConnector>> {
    let connector =
        bandwatch_core::BluezConnector::new(&config.device.address, config.device.adapter.clone())
            .context("invalid device address")?;
    Ok(Arc::new(connector))
}

/// A simulated band streaming a steady heart rate, for runs without hardware.
///
/// # Errors
///
/// Never fails; the signature matches the BlueZ variant.
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub fn build_connector(config: &Config) -> anyhow::Result<Arc<dyn LinkConnector>> {
    use std::time::Duration;

    use bandwatch_core::{SimulatedBand, SimulatedConnector};

    const CHALLENGE: [u8; 16] = *b"bandwatch-sim-01";

    tracing::warn!("using a simulated band; no Bluetooth traffic will happen");
    let profile = config.profile.clone();
    Ok(Arc::new(SimulatedConnector::endless(move || {
        SimulatedBand::new(profile.clone(), CHALLENGE)
            .with_heart_rate_stream(72, Duration::from_secs(1))
            .with_battery_levels([80])
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_topic_builds_log_notifier() {
        assert!(build_notifier(&Config::default()).is_ok());
    }

    #[test]
    fn test_topic_builds_ntfy_notifier() {
        let mut config = Config::default();
        config.notifier.topic = Some("vitals".into());
        assert!(build_notifier(&config).is_ok());
    }
}
