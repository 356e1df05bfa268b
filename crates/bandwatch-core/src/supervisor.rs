//! The reconnect loop.
//!
//! [`SessionSupervisor::run`] owns the whole lifecycle: acquire a link,
//! connect, authenticate, start heart-rate streaming, then run three tasks
//! per session (notification consumer, battery poller, watchdog). The first
//! task to finish ends the session. Every other task is cancelled and awaited
//! before the link is released, so no task from an old session can touch the
//! next one. Then the supervisor waits and starts over with a fresh
//! [`Session`], forever, until the shutdown token fires.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::AuthNegotiator;
use crate::cipher::BLOCK_LEN;
use crate::config::Config;
use crate::error::{BandwatchError, Result};
use crate::link::{Link, LinkConnector, LinkError, Notifications};
use crate::notifier::Notifier;
use crate::outputs::Outputs;
use crate::recorder::Recorder;
use crate::session::Session;
use crate::types::MonitorEvent;

/// Heart-rate value carried by a measurement notification.
///
/// Byte 0 holds flags, byte 1 the 8-bit value. Shorter payloads carry nothing.
#[must_use]
pub fn parse_heart_rate(payload: &[u8]) -> Option<u8> {
    payload.get(1).copied()
}

/// Runs sessions back to back, reconnecting after every failure.
pub struct SessionSupervisor {
    config: Arc<Config>,
    key: [u8; BLOCK_LEN],
    connector: Arc<dyn LinkConnector>,
    outputs: Arc<Outputs>,
    attempts: AtomicU64,
}

impl SessionSupervisor {
    /// Create a supervisor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the auth key does not decode.
    pub fn new(
        config: Config,
        connector: Arc<dyn LinkConnector>,
        recorder: Arc<dyn Recorder>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let key = config.device.auth_key_bytes()?;
        let outputs = Outputs::new(recorder, notifier, config.session.notify_timeout());
        Ok(Self {
            config: Arc::new(config),
            key,
            connector,
            outputs: Arc::new(outputs),
            attempts: AtomicU64::new(0),
        })
    }

    /// Subscribe to the monitor event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.outputs.subscribe()
    }

    /// Connection attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Supervise sessions until `shutdown` is cancelled.
    ///
    /// Session failures never escape: each one is logged, recorded and
    /// followed by the reconnect delay.
    pub async fn run(&self, shutdown: CancellationToken) {
        let delay = self.config.session.reconnect_delay();
        info!(address = %self.config.device.address, "supervisor started");

        while !shutdown.is_cancelled() {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let result = self
                .attempt(attempt, &shutdown)
                .instrument(info_span!("session", attempt))
                .await;

            let reason = match &result {
                Ok(()) => {
                    info!(attempt, "session closed for shutdown");
                    "shutdown requested".to_string()
                }
                Err(err) => {
                    warn!(
                        attempt,
                        code = err.error_code(),
                        "Session {attempt} ended: {err}. Reconnecting in {}s",
                        delay.as_secs()
                    );
                    err.to_string()
                }
            };
            self.outputs.session_ended(Utc::now(), &reason).await;

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        info!("supervisor stopped");
    }

    async fn attempt(&self, attempt: u64, shutdown: &CancellationToken) -> Result<()> {
        let acquire = async { self.connector.acquire().await.map_err(BandwatchError::from) };
        let Some(link) = unless_cancelled(shutdown, acquire).await? else {
            return Ok(());
        };

        let result = self.drive(attempt, &link, shutdown).await;
        if let Err(err) = link.disconnect().await {
            debug!(error = %err, "disconnect failed");
        }
        result
    }

    async fn drive(
        &self,
        attempt: u64,
        link: &Arc<dyn Link>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let profile = &self.config.profile;
        let timing = &self.config.session;

        let setup = async {
            link.connect().await?;
            tokio::time::sleep(timing.settle_delay()).await;

            let session = Arc::new(Session::new(attempt, &self.config));
            info!(session = %session.id(), "session started");
            self.outputs.publish(MonitorEvent::SessionStarted { attempt });

            AuthNegotiator::new(profile, self.key, timing.auth_timeout())
                .authenticate(link.as_ref())
                .await?;
            session.mark_authenticated();
            self.outputs.publish(MonitorEvent::Authenticated);

            let notifications = link.subscribe(profile.heart_rate_measurement).await?;
            link.write_characteristic(profile.heart_rate_control, &profile.start_heart_rate, true)
                .await?;
            info!("heart-rate streaming started");
            Ok::<_, BandwatchError>((session, notifications))
        };
        let Some((session, notifications)) = unless_cancelled(shutdown, setup).await? else {
            return Ok(());
        };

        let token = shutdown.child_token();
        let mut tasks = JoinSet::new();
        tasks.spawn(
            consume_heart_rate(
                Arc::clone(&session),
                notifications,
                Arc::clone(&self.outputs),
                token.clone(),
            )
            .in_current_span(),
        );
        tasks.spawn(
            poll_battery(
                Arc::clone(&session),
                Arc::clone(link),
                BatteryPoll {
                    uuid: profile.battery_characteristic,
                    level_index: profile.battery_level_index,
                    period: timing.battery_poll_interval(),
                },
                Arc::clone(&self.outputs),
                token.clone(),
            )
            .in_current_span(),
        );
        tasks.spawn(
            run_watchdog(
                Arc::clone(&session),
                timing.watchdog_poll_interval(),
                Arc::clone(&self.outputs),
                token.clone(),
            )
            .in_current_span(),
        );

        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => Ok(()),
            Some(joined) = tasks.join_next() => flatten(joined),
            else => Ok(()),
        };

        token.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = flatten(joined) {
                debug!(error = %err, "task ended during teardown");
            }
        }
        if let Err(err) = link.unsubscribe(profile.heart_rate_measurement).await {
            debug!(error = %err, "unsubscribe failed");
        }
        outcome
    }
}

async fn unless_cancelled<T>(
    shutdown: &CancellationToken,
    step: impl Future<Output = Result<T>>,
) -> Result<Option<T>> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Ok(None),
        result = step => result.map(Some),
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|err| BandwatchError::TaskFailed(err.to_string()))?
}

async fn consume_heart_rate(
    session: Arc<Session>,
    mut notifications: Notifications,
    outputs: Arc<Outputs>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let payload = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            next = notifications.recv() => next.ok_or_else(|| {
                LinkError::disconnected("heart-rate notification stream closed")
            })?,
        };
        let Some(bpm) = parse_heart_rate(&payload) else {
            debug!(len = payload.len(), "short heart-rate notification ignored");
            continue;
        };
        let outcome = session.observe_heart_rate(bpm).await;
        outputs.heart_rate(outcome).await;
    }
}

struct BatteryPoll {
    uuid: Uuid,
    level_index: usize,
    period: Duration,
}

async fn poll_battery(
    session: Arc<Session>,
    link: Arc<dyn Link>,
    poll: BatteryPoll,
    outputs: Arc<Outputs>,
    token: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(poll.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let read = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                read = link.read_characteristic(poll.uuid) => read,
            },
        };

        match read {
            Ok(payload) => match payload.get(poll.level_index) {
                Some(&level) => outputs.battery(session.observe_battery(level).await).await,
                None => warn!(len = payload.len(), "battery payload too short"),
            },
            Err(err) if err.is_disconnect() => return Err(err.into()),
            Err(err) => warn!(error = %err, "battery read failed"),
        }
    }
}

async fn run_watchdog(
    session: Arc<Session>,
    period: Duration,
    outputs: Arc<Outputs>,
    token: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if let Err(trip) = session.check_watchdog().await {
            if let Some(alert) = &trip.alert {
                outputs.alert(alert).await;
            }
            return Err(trip.error);
        }
    }
}
