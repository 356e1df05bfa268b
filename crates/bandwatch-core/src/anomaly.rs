//! Heart-rate anomaly detection with cooldown-gated alerts.
//!
//! Alerts are only evaluated while the band is [`WearState::InUse`]. By
//! default a single cooldown window is shared by every category, so a burst
//! of alternating low and high readings produces one alert per window, not
//! one per category. [`CooldownScope::PerCategory`] keeps a window per
//! category instead.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{AlertConfig, AlertMode, CooldownScope};
use crate::types::{AlertCategory, AlertEvent, WearState};

/// Turns heart-rate samples into cooldown-gated [`AlertEvent`]s. One per session.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    brady_limit: u8,
    tachy_limit: u8,
    cooldown: TimeDelta,
    mode: AlertMode,
    window_len: usize,
    scope: CooldownScope,
    recent: VecDeque<u8>,
    last_alert: Option<DateTime<Utc>>,
    last_alert_by_category: HashMap<AlertCategory, DateTime<Utc>>,
}

impl AnomalyDetector {
    /// Create a detector with no alert history.
    #[must_use]
    pub fn new(config: &AlertConfig) -> Self {
        let window_len = match config.mode {
            AlertMode::Immediate => 1,
            AlertMode::Consecutive => config.consecutive_samples.max(1),
        };
        Self {
            brady_limit: config.brady_limit,
            tachy_limit: config.tachy_limit,
            cooldown: config.cooldown(),
            mode: config.mode,
            window_len,
            scope: config.cooldown_scope,
            recent: VecDeque::with_capacity(window_len),
            last_alert: None,
            last_alert_by_category: HashMap::new(),
        }
    }

    /// When the most recent alert of any category fired.
    #[must_use]
    pub const fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.last_alert
    }

    /// Evaluate one non-sentinel sample.
    ///
    /// Sentinel zeros never reach this method; they belong to the wear classifier.
    pub fn evaluate(
        &mut self,
        bpm: u8,
        wear: WearState,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        if self.recent.len() == self.window_len {
            self.recent.pop_front();
        }
        self.recent.push_back(bpm);

        if wear != WearState::InUse || self.recent.len() < self.window_len {
            return None;
        }

        let (category, label) = if self.recent.iter().all(|&b| b <= self.brady_limit) {
            (AlertCategory::Bradycardia, "Bradycardia detected")
        } else if self.recent.iter().all(|&b| b >= self.tachy_limit) {
            (AlertCategory::Tachycardia, "Tachycardia detected")
        } else {
            return None;
        };

        let message = match self.mode {
            AlertMode::Immediate => format!("{label} (BPM={bpm})"),
            AlertMode::Consecutive => {
                let readings: Vec<String> = self.recent.iter().map(u8::to_string).collect();
                format!("{label} (BPM={})", readings.join(", "))
            }
        };
        self.fire(category, message, now)
    }

    /// Raise a data-absence alert for `silence` without heart-rate data.
    pub fn absence(&mut self, silence: TimeDelta, now: DateTime<Utc>) -> Option<AlertEvent> {
        let message = format!(
            "No heart-rate data for more than {} minutes",
            silence.num_minutes()
        );
        self.fire(AlertCategory::DataAbsence, message, now)
    }

    fn fire(
        &mut self,
        category: AlertCategory,
        message: String,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        let previous = match self.scope {
            CooldownScope::Shared => self.last_alert,
            CooldownScope::PerCategory => self.last_alert_by_category.get(&category).copied(),
        };
        if previous.is_some_and(|at| now - at < self.cooldown) {
            tracing::debug!(%category, "alert suppressed by cooldown");
            return None;
        }

        self.last_alert = Some(now);
        self.last_alert_by_category.insert(category, now);
        Some(AlertEvent {
            at: now,
            category,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn at_minutes(n: i64) -> DateTime<Utc> {
        t0() + TimeDelta::minutes(n)
    }

    fn detector_with(f: impl FnOnce(&mut AlertConfig)) -> AnomalyDetector {
        let mut config = AlertConfig::default();
        f(&mut config);
        AnomalyDetector::new(&config)
    }

    #[test]
    fn test_two_low_samples_emit_one_bradycardia_alert() {
        let mut d = detector_with(|_| {});
        let alerts: Vec<_> = [40, 42]
            .into_iter()
            .filter_map(|bpm| d.evaluate(bpm, WearState::InUse, t0()))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Bradycardia);
        assert_eq!(alerts[0].message, "Bradycardia detected (BPM=40)");
    }

    #[test]
    fn test_third_low_sample_within_cooldown_is_suppressed() {
        let mut d = detector_with(|_| {});
        assert!(d.evaluate(40, WearState::InUse, at_minutes(0)).is_some());
        assert!(d.evaluate(42, WearState::InUse, at_minutes(0)).is_none());
        assert!(d.evaluate(41, WearState::InUse, at_minutes(5)).is_none());
    }

    #[test]
    fn test_third_low_sample_after_cooldown_fires() {
        let mut d = detector_with(|c| c.cooldown_secs = 240);
        assert!(d.evaluate(40, WearState::InUse, at_minutes(0)).is_some());
        assert!(d.evaluate(42, WearState::InUse, at_minutes(0)).is_none());
        assert!(d.evaluate(41, WearState::InUse, at_minutes(5)).is_some());
    }

    #[test]
    fn test_limits_are_inclusive() {
        let mut d = detector_with(|c| c.cooldown_secs = 0);
        assert!(d.evaluate(50, WearState::InUse, at_minutes(0)).is_some());
        assert!(d.evaluate(51, WearState::InUse, at_minutes(1)).is_none());
        assert!(d.evaluate(109, WearState::InUse, at_minutes(2)).is_none());
        let alert = d.evaluate(110, WearState::InUse, at_minutes(3)).unwrap();
        assert_eq!(alert.category, AlertCategory::Tachycardia);
    }

    #[test]
    fn test_no_alerts_unless_in_use() {
        let mut d = detector_with(|_| {});
        assert!(d.evaluate(30, WearState::Charging, t0()).is_none());
        assert!(d.evaluate(150, WearState::Removed, t0()).is_none());
        assert_eq!(d.last_alert_at(), None);
    }

    #[test]
    fn test_shared_cooldown_suppresses_other_category() {
        let mut d = detector_with(|_| {});
        assert!(d.evaluate(130, WearState::InUse, at_minutes(0)).is_some());
        assert!(d.evaluate(40, WearState::InUse, at_minutes(1)).is_none());
        assert!(d.absence(TimeDelta::minutes(5), at_minutes(2)).is_none());
    }

    #[test]
    fn test_per_category_cooldown_allows_other_category() {
        let mut d = detector_with(|c| c.cooldown_scope = CooldownScope::PerCategory);
        assert!(d.evaluate(130, WearState::InUse, at_minutes(0)).is_some());
        assert!(d.evaluate(40, WearState::InUse, at_minutes(1)).is_some());
        assert!(d.evaluate(135, WearState::InUse, at_minutes(2)).is_none());
    }

    #[test]
    fn test_consecutive_mode_ignores_single_spike() {
        let mut d = detector_with(|c| c.mode = AlertMode::Consecutive);
        assert!(d.evaluate(40, WearState::InUse, at_minutes(0)).is_none());
        assert!(d.evaluate(70, WearState::InUse, at_minutes(1)).is_none());
        assert!(d.evaluate(125, WearState::InUse, at_minutes(2)).is_none());
        let alert = d.evaluate(128, WearState::InUse, at_minutes(3)).unwrap();
        assert_eq!(alert.category, AlertCategory::Tachycardia);
        assert_eq!(alert.message, "Tachycardia detected (BPM=125, 128)");
    }

    #[test]
    fn test_consecutive_mode_two_low_samples_emit_one_alert() {
        let mut d = detector_with(|c| c.mode = AlertMode::Consecutive);
        let alerts: Vec<_> = [40, 42]
            .into_iter()
            .filter_map(|bpm| d.evaluate(bpm, WearState::InUse, t0()))
            .collect();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_absence_alert_message() {
        let mut d = detector_with(|_| {});
        let alert = d.absence(TimeDelta::minutes(5), t0()).unwrap();
        assert_eq!(alert.category, AlertCategory::DataAbsence);
        assert!(alert.message.contains("5 minutes"));
        assert_eq!(d.last_alert_at(), Some(t0()));
    }
}
