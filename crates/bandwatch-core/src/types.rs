//! Shared value types flowing out of a monitoring session.
//!
//! Everything the core observes or decides is expressed as one of these
//! values and handed to the recorder, the notifier and the event stream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heart-rate reading from the measurement characteristic.
///
/// A `bpm` of 0 is the band's off-body / charging sentinel, not a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// When the notification was processed.
    pub at: DateTime<Utc>,
    /// Beats per minute as reported by the band.
    pub bpm: u8,
}

impl HeartRateSample {
    /// The off-body / charging sentinel value.
    pub const SENTINEL_BPM: u8 = 0;

    /// Returns `true` for the off-body / charging sentinel value.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.bpm == Self::SENTINEL_BPM
    }
}

/// One polled battery level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryObservation {
    /// When the level was read.
    pub at: DateTime<Utc>,
    /// Battery level in percent (0-100).
    pub level: u8,
}

/// Inferred physical state of the wearable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WearState {
    /// On the wrist and reporting.
    #[default]
    InUse,
    /// On the charger.
    Charging,
    /// Off the wrist, not charging.
    Removed,
}

impl WearState {
    /// Stable upper-case name, as stored in events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InUse => "IN_USE",
            Self::Charging => "CHARGING",
            Self::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for WearState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change of [`WearState`]. Only produced when the value actually changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WearTransition {
    /// When the change was decided.
    pub at: DateTime<Utc>,
    /// State before the change.
    pub from: WearState,
    /// State after the change.
    pub to: WearState,
    /// Human-readable reason, suitable for the event log.
    pub description: String,
}

/// Clinical alert categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertCategory {
    /// Heart rate at or below the low limit.
    Bradycardia,
    /// Heart rate at or above the high limit.
    Tachycardia,
    /// No heart-rate data while the band should be worn.
    DataAbsence,
}

impl AlertCategory {
    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bradycardia => "bradycardia",
            Self::Tachycardia => "tachycardia",
            Self::DataAbsence => "data-absence",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert that passed the cooldown gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// When the alert fired.
    pub at: DateTime<Utc>,
    /// What kind of condition fired it.
    pub category: AlertCategory,
    /// Human-readable message sent to the notifier.
    pub message: String,
}

/// Everything the supervisor publishes on its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A new link was acquired and connected.
    SessionStarted {
        /// 1-based connection attempt counter.
        attempt: u64,
    },
    /// The challenge/response handshake completed.
    Authenticated,
    /// A non-sentinel heart-rate reading.
    HeartRate(HeartRateSample),
    /// A battery poll result.
    Battery(BatteryObservation),
    /// The wear state changed.
    WearChanged(WearTransition),
    /// An alert fired.
    Alert(AlertEvent),
    /// The session terminated; the supervisor will reconnect.
    SessionEnded {
        /// Human-readable termination reason.
        reason: String,
    },
}
