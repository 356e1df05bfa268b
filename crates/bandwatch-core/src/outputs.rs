//! Where session results go: the recorder, the notifier and the event stream.
//!
//! Nothing here can fail a session. Recorder and notifier errors are logged
//! and dropped, and a notifier call is bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::notifier::{Notification, Notifier};
use crate::recorder::Recorder;
use crate::session::{BatteryOutcome, HeartRateOutcome};
use crate::types::{AlertEvent, HeartRateSample, MonitorEvent, WearTransition};

/// Capacity of the monitor event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out for everything a session produces.
pub struct Outputs {
    recorder: Arc<dyn Recorder>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<MonitorEvent>,
    notify_timeout: Duration,
}

impl Outputs {
    /// Create the fan-out with a fresh event channel.
    #[must_use]
    pub fn new(
        recorder: Arc<dyn Recorder>,
        notifier: Arc<dyn Notifier>,
        notify_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            recorder,
            notifier,
            events,
            notify_timeout,
        }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver everything a heart-rate notification produced.
    pub async fn heart_rate(&self, outcome: HeartRateOutcome) {
        if let Some(sample) = outcome.sample {
            self.sample(sample).await;
        }
        if let Some(transition) = outcome.transition {
            self.transition(&transition).await;
        }
        if let Some(alert) = outcome.alert {
            self.alert(&alert).await;
        }
    }

    /// Deliver a battery poll result.
    pub async fn battery(&self, outcome: BatteryOutcome) {
        let BatteryOutcome {
            observation,
            transition,
        } = outcome;
        debug!(level = observation.level, "battery");
        if let Err(err) = self
            .recorder
            .append_battery(observation.at, observation.level)
            .await
        {
            warn!(error = %err, "failed to record battery level");
        }
        self.publish(MonitorEvent::Battery(observation));

        if let Some(transition) = transition {
            self.transition(&transition).await;
        }
    }

    /// Record, notify and publish an alert.
    pub async fn alert(&self, alert: &AlertEvent) {
        warn!(category = %alert.category, "{}", alert.message);
        self.event(alert.at, &format!("ALERT: {}", alert.message))
            .await;

        let notification = Notification::alert(alert);
        match tokio::time::timeout(self.notify_timeout, self.notifier.send(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to send alert"),
            Err(_) => warn!(
                timeout_secs = self.notify_timeout.as_secs(),
                "alert delivery timed out"
            ),
        }
        self.publish(MonitorEvent::Alert(alert.clone()));
    }

    /// Record and publish the end of a session.
    pub async fn session_ended(&self, at: DateTime<Utc>, reason: &str) {
        self.event(at, &format!("Session ended: {reason}")).await;
        self.publish(MonitorEvent::SessionEnded {
            reason: reason.to_string(),
        });
    }

    async fn sample(&self, sample: HeartRateSample) {
        debug!(bpm = sample.bpm, "heart rate");
        if let Err(err) = self.recorder.append_heart_rate(sample.at, sample.bpm).await {
            warn!(error = %err, "failed to record heart rate");
        }
        self.publish(MonitorEvent::HeartRate(sample));
    }

    async fn transition(&self, transition: &WearTransition) {
        info!(state = %transition.to, "{}", transition.description);
        self.event(transition.at, &transition.description).await;
        self.publish(MonitorEvent::WearChanged(transition.clone()));
    }

    async fn event(&self, at: DateTime<Utc>, text: &str) {
        if let Err(err) = self.recorder.append_event(at, text).await {
            warn!(error = %err, "failed to record event");
        }
    }
}
