//! # bandwatch-core
//!
//! Core session supervision for an authenticated BLE heart-rate wearable.
//!
//! This crate provides:
//! - Challenge/response authentication over the link (AES-128 single block)
//! - Wear-state classification from heart-rate and battery signals
//! - Cooldown-gated bradycardia, tachycardia and data-absence alerts
//! - A staleness watchdog that detects silently dropped links
//! - A supervisor that reconnects forever with fresh per-session state
//!
//! ## Architecture
//!
//! - [`supervisor`] - Reconnect loop and per-session task set
//! - [`session`] - Per-attempt state, owned by one session
//! - [`auth`] and [`cipher`] - The handshake
//! - [`wear`], [`anomaly`], [`watchdog`] - Pure decision logic
//! - [`link`] - Link capability, BlueZ backend and a simulated band
//! - [`recorder`], [`notifier`], [`outputs`] - Where results go
//! - [`report`] and [`status`] - Daily summary and live snapshot
//! - [`config`], [`error`], [`types`] - Shared plumbing

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod anomaly;
pub mod auth;
pub mod cipher;
pub mod config;
pub mod error;
pub mod link;
pub mod notifier;
pub mod outputs;
pub mod recorder;
pub mod report;
pub mod session;
pub mod status;
pub mod supervisor;
pub mod types;
pub mod watchdog;
pub mod wear;

// Re-export primary types for convenience
pub use anomaly::AnomalyDetector;
pub use auth::AuthNegotiator;
pub use config::{
    config_path, default_data_dir, is_valid_auth_key, is_valid_mac_address, AlertConfig,
    AlertMode, Config, ConfigError, ConfigResult, CooldownScope, DeviceProfile,
};
pub use error::{BandwatchError, Error, Result};
#[cfg(feature = "bluetooth")]
pub use link::bluez::BluezConnector;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use link::simulated::{SimulatedBand, SimulatedConnector};
pub use link::{Link, LinkConnector, LinkError};
pub use notifier::{LogNotifier, Notification, Notifier, NotifierError, NtfyNotifier, Priority};
pub use recorder::{Recorder, RecorderError, SqliteRecorder};
pub use report::{format_daily_report, local_day_bounds, DailyStats};
pub use session::Session;
pub use status::{LinkState, StatusSnapshot};
pub use supervisor::SessionSupervisor;
pub use types::{
    AlertCategory, AlertEvent, BatteryObservation, HeartRateSample, MonitorEvent, WearState,
    WearTransition,
};
pub use watchdog::SessionWatchdog;
pub use wear::WearStateClassifier;
