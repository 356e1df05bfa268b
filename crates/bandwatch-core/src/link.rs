//! The wireless link to the wearable.
//!
//! The core never talks to a Bluetooth stack directly. It consumes the
//! [`Link`] capability (connect, GATT reads/writes, notification channels)
//! and acquires a fresh instance per session through a [`LinkConnector`].
//!
//! Inbound notifications are delivered through a bounded channel per
//! characteristic, in arrival order. A closed channel means the link is gone.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub mod simulated;

/// Capacity of each notification channel.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Ordered stream of raw notification payloads for one characteristic.
pub type Notifications = mpsc::Receiver<Vec<u8>>;

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The device address could not be parsed.
    #[error("Invalid device address: '{address}'")]
    InvalidAddress {
        /// The offending address.
        address: String,
    },

    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {message}")]
    AdapterUnavailable {
        /// Underlying reason.
        message: String,
    },

    /// Connecting to the device failed.
    #[error("Connection to {address} failed: {message}")]
    ConnectFailed {
        /// Target device.
        address: String,
        /// Underlying reason.
        message: String,
    },

    /// GATT services did not resolve in time.
    #[error("GATT services not resolved after {waited_secs} seconds")]
    ServicesUnresolved {
        /// How long we waited.
        waited_secs: u64,
    },

    /// The device does not expose a characteristic we need.
    #[error("Characteristic {uuid} not found on device")]
    CharacteristicNotFound {
        /// Missing characteristic.
        uuid: Uuid,
    },

    /// The link dropped, or a notification stream ended.
    #[error("Link disconnected: {context}")]
    Disconnected {
        /// Where the disconnect was noticed.
        context: String,
    },

    /// Any other read/write/subscribe failure.
    #[error("Link I/O failed on {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Underlying reason.
        message: String,
    },
}

impl LinkError {
    /// Shorthand for [`LinkError::Disconnected`].
    pub fn disconnected(context: impl Into<String>) -> Self {
        Self::Disconnected {
            context: context.into(),
        }
    }

    /// Returns `true` when the link itself is gone, as opposed to a single
    /// failed operation on a live link.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::ConnectFailed { .. })
    }
}

/// One connection to the wearable.
///
/// Implementations must be cheap to share behind an [`Arc`]; the session's
/// background tasks all hold a handle to the same link.
#[async_trait]
pub trait Link: Send + Sync {
    /// Connect and settle GATT service discovery.
    async fn connect(&self) -> Result<(), LinkError>;

    /// Drop the connection and stop every notification forwarder.
    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Write `bytes` to a characteristic. `needs_ack` selects
    /// write-with-response over write-command.
    async fn write_characteristic(
        &self,
        uuid: Uuid,
        bytes: &[u8],
        needs_ack: bool,
    ) -> Result<(), LinkError>;

    /// Read the current value of a characteristic.
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, LinkError>;

    /// Enable notifications and return the ordered payload channel.
    async fn subscribe(&self, uuid: Uuid) -> Result<Notifications, LinkError>;

    /// Stop notifications for a characteristic.
    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), LinkError>;
}

/// Produces a fresh, unconnected [`Link`] to the configured device.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Acquire a new link. Called once per session attempt.
    async fn acquire(&self) -> Result<Arc<dyn Link>, LinkError>;
}
