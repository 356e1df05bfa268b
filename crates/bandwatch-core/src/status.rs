//! A point-in-time view of the monitor, folded from the event stream.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{AlertEvent, BatteryObservation, HeartRateSample, MonitorEvent, WearState};

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No session, or between sessions.
    #[default]
    Disconnected,
    /// Connected, handshake pending.
    Connecting,
    /// Authenticated and streaming.
    Streaming,
}

/// Current monitor status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Link lifecycle.
    pub link: LinkState,
    /// Wear state of the current session.
    pub wear: WearState,
    /// Attempt number of the current or last session.
    pub attempt: u64,
    /// Sessions started since the process began.
    pub sessions_started: u64,
    /// Last non-sentinel heart-rate reading.
    pub last_heart_rate: Option<HeartRateSample>,
    /// Last battery reading.
    pub last_battery: Option<BatteryObservation>,
    /// Last alert that fired.
    pub last_alert: Option<AlertEvent>,
    /// Why the last session ended.
    pub last_session_end: Option<String>,
    /// When the snapshot last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &MonitorEvent) {
        match event {
            MonitorEvent::SessionStarted { attempt } => {
                self.link = LinkState::Connecting;
                self.wear = WearState::default();
                self.attempt = *attempt;
                self.sessions_started += 1;
            }
            MonitorEvent::Authenticated => self.link = LinkState::Streaming,
            MonitorEvent::HeartRate(sample) => self.last_heart_rate = Some(*sample),
            MonitorEvent::Battery(observation) => self.last_battery = Some(*observation),
            MonitorEvent::WearChanged(transition) => self.wear = transition.to,
            MonitorEvent::Alert(alert) => self.last_alert = Some(alert.clone()),
            MonitorEvent::SessionEnded { reason } => {
                self.link = LinkState::Disconnected;
                self.last_session_end = Some(reason.clone());
            }
        }
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertCategory, WearTransition};

    #[test]
    fn test_snapshot_follows_session_lifecycle() {
        let now = Utc::now();
        let mut status = StatusSnapshot::default();
        assert_eq!(status.link, LinkState::Disconnected);

        status.apply(&MonitorEvent::SessionStarted { attempt: 1 });
        assert_eq!(status.link, LinkState::Connecting);
        status.apply(&MonitorEvent::Authenticated);
        assert_eq!(status.link, LinkState::Streaming);

        status.apply(&MonitorEvent::HeartRate(HeartRateSample { at: now, bpm: 64 }));
        status.apply(&MonitorEvent::Battery(BatteryObservation { at: now, level: 55 }));
        status.apply(&MonitorEvent::WearChanged(WearTransition {
            at: now,
            from: WearState::InUse,
            to: WearState::Charging,
            description: "charging".into(),
        }));
        status.apply(&MonitorEvent::Alert(AlertEvent {
            at: now,
            category: AlertCategory::Bradycardia,
            message: "low".into(),
        }));

        assert_eq!(status.last_heart_rate.unwrap().bpm, 64);
        assert_eq!(status.last_battery.unwrap().level, 55);
        assert_eq!(status.wear, WearState::Charging);
        assert!(status.last_alert.is_some());

        status.apply(&MonitorEvent::SessionEnded {
            reason: "link dropped".into(),
        });
        assert_eq!(status.link, LinkState::Disconnected);
        assert_eq!(status.last_session_end.as_deref(), Some("link dropped"));
    }

    #[test]
    fn test_new_session_resets_wear_but_keeps_history() {
        let mut status = StatusSnapshot::default();
        status.apply(&MonitorEvent::SessionStarted { attempt: 1 });
        status.apply(&MonitorEvent::HeartRate(HeartRateSample {
            at: Utc::now(),
            bpm: 70,
        }));
        status.wear = WearState::Removed;

        status.apply(&MonitorEvent::SessionStarted { attempt: 2 });
        assert_eq!(status.wear, WearState::InUse);
        assert_eq!(status.sessions_started, 2);
        assert_eq!(status.attempt, 2);
        assert!(status.last_heart_rate.is_some());
    }

    #[test]
    fn test_snapshot_serializes_snake_case() {
        let json = serde_json::to_value(StatusSnapshot::default()).unwrap();
        assert_eq!(json["link"], "disconnected");
        assert_eq!(json["wear"], "IN_USE");
    }
}
