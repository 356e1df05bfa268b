//! Wear-state classification from indirect signals.
//!
//! The band never says "I am on the charger". We infer it from the battery
//! trend, the heart-rate stream and the zero-BPM sentinel:
//!
//! 1. Startup charging: among the first N battery readings, any reading above
//!    the first means the band was already charging when we connected.
//! 2. Charging by rise: the battery has kept rising for the configured duration.
//! 3. Un-charging: charging, but heart-rate data is fresh again.
//! 4. Removal: in use, but heart-rate data is stale.
//! 5. Zero BPM: the sensor reports 0, which the band does on the charger.
//!
//! Rules are evaluated in that order on every battery observation. Rule 5 and
//! the heart-rate half of rules 3/4 react to samples as they arrive.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::WearConfig;
use crate::types::{HeartRateSample, WearState, WearTransition};

/// Three-state wear classifier. One per session.
#[derive(Debug, Clone)]
pub struct WearStateClassifier {
    state: WearState,
    startup_samples: usize,
    rise_duration: TimeDelta,
    startup_readings: Vec<u8>,
    startup_done: bool,
    last_level: Option<u8>,
    rising_since: Option<DateTime<Utc>>,
}

impl WearStateClassifier {
    /// Create a classifier in [`WearState::InUse`].
    #[must_use]
    pub fn new(config: &WearConfig) -> Self {
        Self {
            state: WearState::InUse,
            startup_samples: config.startup_samples,
            rise_duration: config.battery_rise(),
            startup_readings: Vec::with_capacity(config.startup_samples),
            startup_done: config.startup_samples == 0,
            last_level: None,
            rising_since: None,
        }
    }

    /// Current wear state.
    #[must_use]
    pub const fn state(&self) -> WearState {
        self.state
    }

    /// Start of the battery rise currently being tracked, if any.
    #[must_use]
    pub const fn rising_since(&self) -> Option<DateTime<Utc>> {
        self.rising_since
    }

    /// Feed one battery reading together with heart-rate freshness.
    pub fn observe_battery(
        &mut self,
        level: u8,
        heart_rate_fresh: bool,
        now: DateTime<Utc>,
    ) -> Option<WearTransition> {
        if let Some(transition) = self.check_startup_charging(level, now) {
            self.last_level = Some(level);
            return Some(transition);
        }

        if let Some(previous) = self.last_level {
            if level > previous {
                self.rising_since.get_or_insert(now);
            } else {
                self.rising_since = None;
            }
        }
        self.last_level = Some(level);

        if let Some(since) = self.rising_since {
            if now - since >= self.rise_duration {
                return self.transition(
                    WearState::Charging,
                    now,
                    format!("Band placed on charger (battery rising since {since})"),
                );
            }
        }

        self.apply_freshness(heart_rate_fresh, now)
    }

    /// Feed one heart-rate sample.
    ///
    /// Zero forces [`WearState::Charging`]. Any other value is fresh data and
    /// brings a charging or removed band back to [`WearState::InUse`].
    pub fn observe_heart_rate(&mut self, bpm: u8, now: DateTime<Utc>) -> Option<WearTransition> {
        if bpm == HeartRateSample::SENTINEL_BPM {
            return self.transition(
                WearState::Charging,
                now,
                "Band probably on charger (BPM=0)".to_string(),
            );
        }
        self.apply_freshness(true, now)
    }

    fn check_startup_charging(&mut self, level: u8, now: DateTime<Utc>) -> Option<WearTransition> {
        if self.startup_done {
            return None;
        }
        self.startup_readings.push(level);
        if self.startup_readings.len() >= self.startup_samples {
            self.startup_done = true;
        }

        let first = self.startup_readings[0];
        if level > first {
            self.startup_done = true;
            return self.transition(
                WearState::Charging,
                now,
                format!("Band was already charging at startup (battery {first}% -> {level}%)"),
            );
        }
        None
    }

    fn apply_freshness(&mut self, fresh: bool, now: DateTime<Utc>) -> Option<WearTransition> {
        match (self.state, fresh) {
            (WearState::Charging, true) => {
                self.rising_since = None;
                self.transition(WearState::InUse, now, "Band taken off charger".to_string())
            }
            (WearState::Removed, true) => {
                self.transition(WearState::InUse, now, "Band back on wrist".to_string())
            }
            (WearState::InUse, false) => self.transition(
                WearState::Removed,
                now,
                "Band removed (no recent heart-rate data)".to_string(),
            ),
            _ => None,
        }
    }

    fn transition(
        &mut self,
        to: WearState,
        at: DateTime<Utc>,
        description: String,
    ) -> Option<WearTransition> {
        if self.state == to {
            return None;
        }
        let from = std::mem::replace(&mut self.state, to);
        Some(WearTransition {
            at,
            from,
            to,
            description,
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

    fn minutes(n: i64) -> DateTime<Utc> {
        t0() + TimeDelta::minutes(n)
    }

    fn classifier() -> WearStateClassifier {
        WearStateClassifier::new(&WearConfig::default())
    }

    #[test]
    fn test_starts_in_use() {
        assert_eq!(classifier().state(), WearState::InUse);
    }

    #[test]
    fn test_startup_rise_means_already_charging() {
        let mut c = classifier();
        assert!(c.observe_battery(40, true, minutes(0)).is_none());
        let t = c.observe_battery(41, true, minutes(1)).unwrap();
        assert_eq!(t.from, WearState::InUse);
        assert_eq!(t.to, WearState::Charging);
        assert!(t.description.contains("already charging"));
    }

    #[test]
    fn test_startup_check_stops_after_n_samples() {
        let mut c = classifier();
        for (i, level) in [50, 50, 50].into_iter().enumerate() {
            assert!(c.observe_battery(level, true, minutes(i as i64)).is_none());
        }
        // Fourth reading is past the startup window; a single rise is only tracked.
        assert!(c.observe_battery(51, true, minutes(3)).is_none());
        assert_eq!(c.state(), WearState::InUse);
        assert_eq!(c.rising_since(), Some(minutes(3)));
    }

    #[test]
    fn test_sustained_rise_means_charging() {
        let mut c = classifier();
        for (i, level) in [50, 50, 50, 51, 52, 53].into_iter().enumerate() {
            assert!(c.observe_battery(level, true, minutes(i as i64)).is_none());
        }
        // Rising since minute 3; minute 6 reaches the 3 minute threshold.
        let t = c.observe_battery(54, true, minutes(6)).unwrap();
        assert_eq!(t.to, WearState::Charging);
    }

    #[test]
    fn test_flat_reading_clears_rise() {
        let mut c = classifier();
        for (i, level) in [50, 50, 50, 51, 52, 52].into_iter().enumerate() {
            c.observe_battery(level, true, minutes(i as i64));
        }
        assert_eq!(c.rising_since(), None);
        assert!(c.observe_battery(53, true, minutes(6)).is_none());
        assert_eq!(c.rising_since(), Some(minutes(6)));
    }

    #[test]
    fn test_fresh_heart_rate_ends_charging() {
        let mut c = classifier();
        c.observe_heart_rate(0, minutes(0));
        assert_eq!(c.state(), WearState::Charging);

        let t = c.observe_heart_rate(64, minutes(1)).unwrap();
        assert_eq!(t.from, WearState::Charging);
        assert_eq!(t.to, WearState::InUse);
        assert_eq!(c.rising_since(), None);
    }

    #[test]
    fn test_stale_heart_rate_means_removed() {
        let mut c = classifier();
        let t = c.observe_battery(80, false, minutes(0)).unwrap();
        assert_eq!(t.to, WearState::Removed);

        let t = c.observe_heart_rate(70, minutes(1)).unwrap();
        assert_eq!(t.to, WearState::InUse);
    }

    #[test]
    fn test_zero_bpm_forces_charging_regardless_of_battery() {
        let mut c = classifier();
        for (i, level) in [90, 89, 88].into_iter().enumerate() {
            c.observe_battery(level, true, minutes(i as i64));
        }
        let t = c.observe_heart_rate(0, minutes(3)).unwrap();
        assert_eq!(t.to, WearState::Charging);
    }

    #[test]
    fn test_repeated_inputs_emit_no_duplicate_events() {
        let mut c = classifier();
        assert!(c.observe_heart_rate(0, minutes(0)).is_some());
        assert!(c.observe_heart_rate(0, minutes(1)).is_none());
        assert!(c.observe_heart_rate(0, minutes(2)).is_none());

        // Charging stays put while heart rate is stale and battery flat.
        assert!(c.observe_battery(70, false, minutes(3)).is_none());
        assert_eq!(c.state(), WearState::Charging);
    }

    #[test]
    fn test_event_emitted_iff_state_changes() {
        let mut c = classifier();
        let inputs: [(Option<u8>, u8, bool); 8] = [
            (Some(60), 0, true),
            (None, 72, true),
            (None, 0, true),
            (None, 0, true),
            (Some(61), 0, false),
            (None, 75, true),
            (Some(61), 0, false),
            (Some(61), 0, false),
        ];
        for (i, (battery, bpm, fresh)) in inputs.into_iter().enumerate() {
            let before = c.state();
            let at = minutes(i as i64 * 10);
            let event = match battery {
                Some(level) => c.observe_battery(level, fresh, at),
                None => c.observe_heart_rate(bpm, at),
            };
            assert_eq!(event.is_some(), before != c.state(), "input #{i}");
            if let Some(e) = event {
                assert_eq!(e.from, before);
                assert_eq!(e.to, c.state());
            }
        }
    }
}
