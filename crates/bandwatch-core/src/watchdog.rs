//! Heart-rate staleness watchdog.
//!
//! A band that silently drops the link keeps the GATT connection looking
//! alive. The only reliable symptom is that heart-rate notifications stop.
//!
//! The wear classifier infers [`WearState::Removed`] from that same silence,
//! so a removed band still counts as expected in use here. Only
//! [`WearState::Charging`], which has its own evidence (rising battery or the
//! zero-BPM sentinel), keeps the watchdog quiet.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::SessionConfig;
use crate::error::{BandwatchError, Result};
use crate::types::WearState;

/// Declares a session dead after prolonged heart-rate silence off the charger.
#[derive(Debug, Clone)]
pub struct SessionWatchdog {
    connected_at: DateTime<Utc>,
    grace: TimeDelta,
    timeout: TimeDelta,
    tripped: bool,
}

impl SessionWatchdog {
    /// Create a watchdog for a session connected at `connected_at`.
    #[must_use]
    pub fn new(config: &SessionConfig, connected_at: DateTime<Utc>) -> Self {
        Self {
            connected_at,
            grace: config.startup_grace(),
            timeout: config.watchdog_timeout(),
            tripped: false,
        }
    }

    /// Returns `true` once the watchdog has fired.
    #[must_use]
    pub const fn tripped(&self) -> bool {
        self.tripped
    }

    /// Evaluate staleness at `now`.
    ///
    /// Quiet during the startup grace period, before the first sample, and
    /// while the band is charging.
    ///
    /// # Errors
    ///
    /// Returns [`BandwatchError::WatchdogTimeout`] the first time the
    /// silence exceeds the timeout. Later calls return `Ok`.
    pub fn check(
        &mut self,
        now: DateTime<Utc>,
        last_heart_rate: Option<DateTime<Utc>>,
        wear: WearState,
    ) -> Result<()> {
        if self.tripped || now - self.connected_at < self.grace {
            return Ok(());
        }
        let Some(last) = last_heart_rate else {
            return Ok(());
        };
        if wear == WearState::Charging {
            return Ok(());
        }

        let silence = now - last;
        if silence > self.timeout {
            self.tripped = true;
            return Err(BandwatchError::WatchdogTimeout {
                silent_secs: silence.num_seconds(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(n)
    }

    fn watchdog() -> SessionWatchdog {
        SessionWatchdog::new(&SessionConfig::default(), t0())
    }

    #[test]
    fn test_quiet_during_grace_period() {
        let mut w = watchdog();
        // Sample 10 minutes before connect would be stale, but we are in grace.
        let stale = Some(t0() - TimeDelta::minutes(10));
        assert!(w.check(secs(39), stale, WearState::InUse).is_ok());
    }

    #[test]
    fn test_quiet_before_first_sample() {
        let mut w = watchdog();
        assert!(w.check(secs(3600), None, WearState::InUse).is_ok());
    }

    #[test]
    fn test_quiet_while_charging() {
        let mut w = watchdog();
        let last = Some(secs(10));
        assert_ok!(w.check(secs(600), last, WearState::Charging));
        assert_err!(w.check(secs(600), last, WearState::InUse));
    }

    #[test]
    fn test_trips_when_silence_marked_band_removed() {
        let mut w = watchdog();
        let last = Some(secs(45));
        assert_ok!(w.check(secs(160), last, WearState::Removed));
        assert_err!(w.check(secs(170), last, WearState::Removed));
    }

    #[test]
    fn test_trips_exactly_once_after_timeout() {
        let mut w = watchdog();
        let last = Some(secs(50));

        assert!(w.check(secs(170), last, WearState::InUse).is_ok());
        let errors = (171..400)
            .step_by(10)
            .filter(|&s| w.check(secs(s), last, WearState::InUse).is_err())
            .count();
        assert_eq!(errors, 1);
        assert!(w.tripped());
    }

    #[test]
    fn test_timeout_error_reports_silence() {
        let mut w = watchdog();
        let err = w
            .check(secs(300), Some(secs(100)), WearState::InUse)
            .unwrap_err();
        assert!(matches!(
            err,
            BandwatchError::WatchdogTimeout { silent_secs: 200 }
        ));
    }
}
