//! The daily report job.

use bandwatch_core::{
    format_daily_report, local_day_bounds, Notification, Notifier, SqliteRecorder,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

/// Today's date in `tz`.
#[must_use]
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Summarize `day` and push it through `notifier`.
///
/// Returns the report text, or `None` when the day has no samples. A failed
/// push is logged, not returned.
///
/// # Errors
///
/// Returns an error if the day bounds cannot be computed or the query fails.
pub async fn run_daily_report(
    recorder: &SqliteRecorder,
    notifier: &dyn Notifier,
    day: NaiveDate,
    tz: Tz,
) -> anyhow::Result<Option<String>> {
    let (from, to) = local_day_bounds(day, tz)?;
    let Some(stats) = recorder.heart_rate_stats(from, to).await? else {
        info!(%day, "no heart-rate data");
        return Ok(None);
    };

    let report = format_daily_report(day, &stats);
    if let Err(err) = notifier.send(&Notification::report(report.clone())).await {
        warn!(error = %err, "failed to send daily report");
    }
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bandwatch_core::{NotifierError, Priority, Recorder};
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifierError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn test_report_sent_with_default_priority() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        for (hour, bpm) in [(1, 60), (12, 80), (23, 70)] {
            let at = Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap();
            recorder.append_heart_rate(at, bpm).await.unwrap();
        }
        let notifier = CapturingNotifier::default();

        let report = run_daily_report(&recorder, &notifier, day(), chrono_tz::UTC)
            .await
            .unwrap()
            .unwrap();
        assert!(report.contains("Average BPM: 70.0"));
        assert!(report.contains("Samples: 3"));

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].priority, Priority::Default);
        assert_eq!(sent[0].body, report);
    }

    #[tokio::test]
    async fn test_empty_day_sends_nothing() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        let notifier = CapturingNotifier::default();

        let report = run_daily_report(&recorder, &notifier, day(), chrono_tz::UTC)
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_day_follows_timezone() {
        let recorder = SqliteRecorder::in_memory().unwrap();
        // 02:00 UTC on March 1st is still February 28th in Sao Paulo.
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        recorder.append_heart_rate(at, 65).await.unwrap();
        let notifier = CapturingNotifier::default();

        let tz = chrono_tz::America::Sao_Paulo;
        assert!(run_daily_report(&recorder, &notifier, day(), tz)
            .await
            .unwrap()
            .is_none());
        let previous = day().pred_opt().unwrap();
        assert!(run_daily_report(&recorder, &notifier, previous, tz)
            .await
            .unwrap()
            .is_some());
    }
}
