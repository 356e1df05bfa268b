//! Per-attempt session state.
//!
//! A [`Session`] is created fresh for every connection attempt and owns every
//! piece of mutable monitoring state: last heart-rate time, the wear
//! classifier, the anomaly detector with its cooldown, and the watchdog.
//! Nothing survives a reconnect because nothing outlives the `Session`.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::anomaly::AnomalyDetector;
use crate::config::Config;
use crate::error::BandwatchError;
use crate::types::{AlertEvent, BatteryObservation, HeartRateSample, WearState, WearTransition};
use crate::watchdog::SessionWatchdog;
use crate::wear::WearStateClassifier;

/// Monotonic clock anchored to wall time when the session starts.
///
/// Timing rules run on this clock, so a wall-clock jump mid-session cannot
/// trip the watchdog or reset a cooldown.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl SessionClock {
    /// Anchor a new clock at the current instant.
    #[must_use]
    pub fn start() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: Instant::now(),
        }
    }

    /// Current time on this clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.anchor_utc + TimeDelta::from_std(self.anchor.elapsed()).unwrap_or_default()
    }
}

/// What a heart-rate notification produced.
#[derive(Debug, Default)]
pub struct HeartRateOutcome {
    /// The reading, unless it was the zero sentinel.
    pub sample: Option<HeartRateSample>,
    /// Wear-state change, if any.
    pub transition: Option<WearTransition>,
    /// Alert that passed the cooldown gate, if any.
    pub alert: Option<AlertEvent>,
}

/// What a battery poll produced.
#[derive(Debug)]
pub struct BatteryOutcome {
    /// The reading.
    pub observation: BatteryObservation,
    /// Wear-state change, if any.
    pub transition: Option<WearTransition>,
}

/// The watchdog fired.
#[derive(Debug)]
pub struct WatchdogTrip {
    /// The session-ending error.
    pub error: BandwatchError,
    /// Data-absence alert, unless suppressed by cooldown.
    pub alert: Option<AlertEvent>,
}

#[derive(Debug)]
struct SessionState {
    last_heart_rate: Option<DateTime<Utc>>,
    last_battery: Option<u8>,
    classifier: WearStateClassifier,
    detector: AnomalyDetector,
    watchdog: SessionWatchdog,
}

/// One attempt to use the link.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    attempt: u64,
    clock: SessionClock,
    started_at: DateTime<Utc>,
    heart_rate_fresh: TimeDelta,
    startup_grace: TimeDelta,
    authenticated: AtomicBool,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session with every field at its initial value.
    #[must_use]
    pub fn new(attempt: u64, config: &Config) -> Self {
        let clock = SessionClock::start();
        let started_at = clock.now();
        Self {
            id: Uuid::new_v4(),
            attempt,
            clock,
            started_at,
            heart_rate_fresh: config.wear.heart_rate_fresh(),
            startup_grace: config.session.startup_grace(),
            authenticated: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                last_heart_rate: None,
                last_battery: None,
                classifier: WearStateClassifier::new(&config.wear),
                detector: AnomalyDetector::new(&config.alerts),
                watchdog: SessionWatchdog::new(&config.session, started_at),
            }),
        }
    }

    /// Unique id, for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// 1-based connection attempt that created this session.
    #[must_use]
    pub const fn attempt(&self) -> u64 {
        self.attempt
    }

    /// When the session started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current time on the session clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Record a completed handshake.
    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Time of the last non-sentinel heart-rate sample.
    pub async fn last_heart_rate_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_heart_rate
    }

    /// Time of the last alert that fired.
    pub async fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.detector.last_alert_at()
    }

    /// Last battery level read.
    pub async fn last_battery(&self) -> Option<u8> {
        self.state.lock().await.last_battery
    }

    /// Current wear state.
    pub async fn wear_state(&self) -> WearState {
        self.state.lock().await.classifier.state()
    }

    /// Process one heart-rate reading.
    ///
    /// Zero goes to the wear classifier only. Anything else refreshes the
    /// watchdog, may end a charging/removed state and is then checked for
    /// anomalies against the resulting wear state.
    pub async fn observe_heart_rate(&self, bpm: u8) -> HeartRateOutcome {
        let sample = HeartRateSample { at: self.now(), bpm };
        let mut state = self.state.lock().await;

        let transition = state.classifier.observe_heart_rate(bpm, sample.at);
        if sample.is_sentinel() {
            return HeartRateOutcome {
                transition,
                ..HeartRateOutcome::default()
            };
        }

        state.last_heart_rate = Some(sample.at);
        let wear = state.classifier.state();
        let alert = state.detector.evaluate(bpm, wear, sample.at);
        HeartRateOutcome {
            sample: Some(sample),
            transition,
            alert,
        }
    }

    /// Process one battery reading.
    pub async fn observe_battery(&self, level: u8) -> BatteryOutcome {
        let now = self.now();
        let mut state = self.state.lock().await;

        let fresh = self.heart_rate_is_fresh(state.last_heart_rate, now);
        state.last_battery = Some(level);
        let transition = state.classifier.observe_battery(level, fresh, now);
        BatteryOutcome {
            observation: BatteryObservation { at: now, level },
            transition,
        }
    }

    /// Run one watchdog evaluation.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchdogTrip`] carrying the session-ending error and the
    /// data-absence alert, if the cooldown allowed one.
    pub async fn check_watchdog(&self) -> Result<(), WatchdogTrip> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let SessionState {
            last_heart_rate,
            classifier,
            detector,
            watchdog,
            ..
        } = &mut *state;

        match watchdog.check(now, *last_heart_rate, classifier.state()) {
            Ok(()) => Ok(()),
            Err(error) => {
                let silence = last_heart_rate.map_or_else(TimeDelta::zero, |last| now - last);
                Err(WatchdogTrip {
                    alert: detector.absence(silence, now),
                    error,
                })
            }
        }
    }

    // Before the first sample arrives we give the band the startup grace
    // period; otherwise the first battery poll would always report removal.
    fn heart_rate_is_fresh(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            Some(at) => now - at < self.heart_rate_fresh,
            None => now - self.started_at < self.startup_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        Config::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_starts_clean() {
        let session = Session::new(1, &config());
        assert!(!session.is_authenticated());
        assert_eq!(session.last_heart_rate_at().await, None);
        assert_eq!(session.last_alert_at().await, None);
        assert_eq!(session.last_battery().await, None);
        assert_eq!(session.wear_state().await, WearState::InUse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_share_no_state() {
        let first = Session::new(1, &config());
        first.mark_authenticated();
        first.observe_heart_rate(40).await;
        first.observe_heart_rate(0).await;
        assert!(first.last_alert_at().await.is_some());
        assert_eq!(first.wear_state().await, WearState::Charging);

        let second = Session::new(2, &config());
        assert_ne!(first.id(), second.id());
        assert!(!second.is_authenticated());
        assert_eq!(second.last_heart_rate_at().await, None);
        assert_eq!(second.last_alert_at().await, None);
        assert_eq!(second.wear_state().await, WearState::InUse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let session = Session::new(1, &config());
        let start = session.now();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(session.now() - start, TimeDelta::seconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_bpm_is_not_a_sample() {
        let session = Session::new(1, &config());
        let outcome = session.observe_heart_rate(0).await;
        assert!(outcome.sample.is_none());
        assert!(outcome.alert.is_none());
        assert_eq!(outcome.transition.unwrap().to, WearState::Charging);
        assert_eq!(session.last_heart_rate_at().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_sample_alerts_while_in_use() {
        let session = Session::new(1, &config());
        let outcome = session.observe_heart_rate(42).await;
        assert_eq!(outcome.sample.unwrap().bpm, 42);
        assert!(outcome.alert.is_some());
        assert!(session.last_heart_rate_at().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_battery_poll_inside_grace_keeps_in_use() {
        let session = Session::new(1, &config());
        let outcome = session.observe_battery(80).await;
        assert!(outcome.transition.is_none());
        assert_eq!(session.last_battery().await, Some(80));

        tokio::time::advance(Duration::from_secs(60)).await;
        let outcome = session.observe_battery(80).await;
        assert_eq!(outcome.transition.unwrap().to, WearState::Removed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_trip_carries_absence_alert() {
        let session = Session::new(1, &config());
        session.observe_heart_rate(70).await;

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(session.check_watchdog().await.is_ok());

        tokio::time::advance(Duration::from_secs(30)).await;
        let trip = session.check_watchdog().await.unwrap_err();
        assert!(matches!(
            trip.error,
            BandwatchError::WatchdogTimeout { silent_secs: 130 }
        ));
        assert!(trip.alert.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_after_removal_still_trips_watchdog() {
        let session = Session::new(1, &config());
        tokio::time::advance(Duration::from_secs(45)).await;
        session.observe_heart_rate(70).await;

        tokio::time::advance(Duration::from_secs(75)).await;
        let outcome = session.observe_battery(80).await;
        assert_eq!(outcome.transition.unwrap().to, WearState::Removed);
        assert!(session.check_watchdog().await.is_ok());

        tokio::time::advance(Duration::from_secs(50)).await;
        let trip = session.check_watchdog().await.unwrap_err();
        assert!(matches!(
            trip.error,
            BandwatchError::WatchdogTimeout { silent_secs: 125 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_charging_keeps_watchdog_quiet() {
        let session = Session::new(1, &config());
        tokio::time::advance(Duration::from_secs(45)).await;
        session.observe_heart_rate(70).await;
        session.observe_heart_rate(0).await;
        assert_eq!(session.wear_state().await, WearState::Charging);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(session.check_watchdog().await.is_ok());
    }
}
