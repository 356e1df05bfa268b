//! A scripted band for tests and hardware-free development runs.
//!
//! The simulated band answers the challenge request, serves scripted battery
//! levels, can synthesize a steady heart-rate stream, and can drop the link
//! silently the way a real band walking out of range does.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Link, LinkConnector, LinkError, Notifications, NOTIFICATION_CHANNEL_CAPACITY};
use crate::cipher::BLOCK_LEN;
use crate::config::DeviceProfile;

/// A write the band received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Target characteristic.
    pub uuid: Uuid,
    /// Payload.
    pub bytes: Vec<u8>,
    /// Write-with-response.
    pub needs_ack: bool,
}

#[derive(Debug, Default)]
struct BandState {
    subscribers: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
    writes: Vec<RecordedWrite>,
    battery: VecDeque<u8>,
    last_battery: Option<u8>,
    dropped: bool,
    fail_writes: bool,
}

/// Scripted implementation of [`Link`].
#[derive(Debug)]
pub struct SimulatedBand {
    profile: DeviceProfile,
    challenge: [u8; BLOCK_LEN],
    reply_to_challenge: bool,
    refuse_connect: bool,
    heart_rate_stream: Option<(u8, Duration)>,
    state: Mutex<BandState>,
    connects: AtomicU64,
    disconnects: AtomicU64,
    battery_reads: AtomicU64,
}

impl SimulatedBand {
    /// A band that answers the challenge request with `challenge`.
    #[must_use]
    pub fn new(profile: DeviceProfile, challenge: [u8; BLOCK_LEN]) -> Self {
        Self {
            profile,
            challenge,
            reply_to_challenge: true,
            refuse_connect: false,
            heart_rate_stream: None,
            state: Mutex::new(BandState::default()),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            battery_reads: AtomicU64::new(0),
        }
    }

    /// Never answer the challenge request.
    #[must_use]
    pub fn without_challenge_reply(mut self) -> Self {
        self.reply_to_challenge = false;
        self
    }

    /// Fail every connect attempt.
    #[must_use]
    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Emit `bpm` every `period` once heart-rate reporting is started.
    #[must_use]
    pub fn with_heart_rate_stream(mut self, bpm: u8, period: Duration) -> Self {
        self.heart_rate_stream = Some((bpm, period));
        self
    }

    /// Serve these battery levels in order, then repeat the last one.
    #[must_use]
    pub fn with_battery_levels(self, levels: impl IntoIterator<Item = u8>) -> Self {
        self.lock().battery.extend(levels);
        self
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Deliver one heart-rate notification. Returns `false` if nobody listens.
    pub fn push_heart_rate(&self, bpm: u8) -> bool {
        self.notify(self.profile.heart_rate_measurement, vec![0x00, bpm])
    }

    /// Deliver a raw notification on any characteristic.
    pub fn notify(&self, uuid: Uuid, payload: Vec<u8>) -> bool {
        let sender = self.lock().subscribers.get(&uuid).cloned();
        sender.is_some_and(|tx| tx.try_send(payload).is_ok())
    }

    /// Drop the link silently: every notification channel closes and every
    /// later operation fails with [`LinkError::Disconnected`].
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.dropped = true;
        state.subscribers.clear();
    }

    /// Whether someone holds the notification channel for `uuid`.
    #[must_use]
    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.lock()
            .subscribers
            .get(&uuid)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Writes received on one characteristic, in order.
    #[must_use]
    pub fn writes_to(&self, uuid: Uuid) -> Vec<RecordedWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.uuid == uuid)
            .cloned()
            .collect()
    }

    /// Number of successful `connect` calls.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    #[must_use]
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of battery reads served.
    #[must_use]
    pub fn battery_reads(&self) -> u64 {
        self.battery_reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BandState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self, context: &str) -> Result<(), LinkError> {
        if self.lock().dropped {
            return Err(LinkError::disconnected(context));
        }
        Ok(())
    }

    fn start_heart_rate_stream(&self) {
        let Some((bpm, period)) = self.heart_rate_stream else {
            return;
        };
        let Some(sender) = self
            .lock()
            .subscribers
            .get(&self.profile.heart_rate_measurement)
            .map(mpsc::Sender::downgrade)
        else {
            return;
        };

        // Holds only a weak sender: unsubscribing or dropping the link ends it.
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(tx) = sender.upgrade() else { break };
                if tx.send(vec![0x00, bpm]).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl Link for SimulatedBand {
    async fn connect(&self) -> Result<(), LinkError> {
        if self.refuse_connect {
            return Err(LinkError::ConnectFailed {
                address: "simulated".to_string(),
                message: "band refused connection".to_string(),
            });
        }
        self.ensure_live("connect")?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.lock().subscribers.clear();
        Ok(())
    }

    async fn write_characteristic(
        &self,
        uuid: Uuid,
        bytes: &[u8],
        needs_ack: bool,
    ) -> Result<(), LinkError> {
        self.ensure_live("write")?;
        {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(LinkError::Io {
                    operation: "write",
                    message: "simulated write failure".to_string(),
                });
            }
            state.writes.push(RecordedWrite {
                uuid,
                bytes: bytes.to_vec(),
                needs_ack,
            });
        }

        if uuid == self.profile.auth_characteristic
            && bytes == self.profile.request_challenge.as_slice()
            && self.reply_to_challenge
        {
            let mut payload = self.profile.challenge_marker.clone();
            payload.extend_from_slice(&self.challenge);
            self.notify(uuid, payload);
        } else if uuid == self.profile.heart_rate_control
            && bytes == self.profile.start_heart_rate.as_slice()
        {
            self.start_heart_rate_stream();
        }
        Ok(())
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, LinkError> {
        self.ensure_live("read")?;
        if uuid != self.profile.battery_characteristic {
            return Err(LinkError::CharacteristicNotFound { uuid });
        }
        self.battery_reads.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        let level = match state.battery.pop_front() {
            Some(level) => {
                state.last_battery = Some(level);
                level
            }
            None => state.last_battery.unwrap_or(80),
        };
        let mut payload = vec![0u8; self.profile.battery_level_index + 1];
        payload[self.profile.battery_level_index] = level;
        Ok(payload)
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<Notifications, LinkError> {
        self.ensure_live("subscribe")?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        self.lock().subscribers.insert(uuid, tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), LinkError> {
        self.lock().subscribers.remove(&uuid);
        Ok(())
    }
}

type BandFactory = Box<dyn Fn() -> SimulatedBand + Send + Sync>;

/// Hands out scripted bands, one per acquisition.
pub struct SimulatedConnector {
    queue: Mutex<VecDeque<Arc<SimulatedBand>>>,
    factory: Option<BandFactory>,
    acquired: AtomicU64,
}

impl SimulatedConnector {
    /// Hand out `bands` in order, then fail every acquisition.
    #[must_use]
    pub fn with_bands(bands: impl IntoIterator<Item = Arc<SimulatedBand>>) -> Self {
        Self {
            queue: Mutex::new(bands.into_iter().collect()),
            factory: None,
            acquired: AtomicU64::new(0),
        }
    }

    /// Build a new band for every acquisition.
    #[must_use]
    pub fn endless(factory: impl Fn() -> SimulatedBand + Send + Sync + 'static) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            factory: Some(Box::new(factory)),
            acquired: AtomicU64::new(0),
        }
    }

    /// Number of acquisition attempts so far.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkConnector for SimulatedConnector {
    async fn acquire(&self) -> Result<Arc<dyn Link>, LinkError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let next = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(band) = next {
            return Ok(band);
        }
        match &self.factory {
            Some(factory) => Ok(Arc::new(factory())),
            None => Err(LinkError::ConnectFailed {
                address: "simulated".to_string(),
                message: "no band in range".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band() -> SimulatedBand {
        SimulatedBand::new(DeviceProfile::default(), [7; BLOCK_LEN])
    }

    #[tokio::test]
    async fn test_battery_script_then_repeat_last() {
        let profile = DeviceProfile::default();
        let band = band().with_battery_levels([50, 51]);

        let mut levels = Vec::new();
        for _ in 0..3 {
            let payload = band
                .read_characteristic(profile.battery_characteristic)
                .await
                .unwrap();
            levels.push(payload[profile.battery_level_index]);
        }
        assert_eq!(levels, vec![50, 51, 51]);
        assert_eq!(band.battery_reads(), 3);
    }

    #[tokio::test]
    async fn test_drop_link_closes_notifications() {
        let profile = DeviceProfile::default();
        let band = band();
        let mut rx = band.subscribe(profile.heart_rate_measurement).await.unwrap();

        assert!(band.push_heart_rate(72));
        assert_eq!(rx.recv().await, Some(vec![0, 72]));

        band.drop_link();
        assert_eq!(rx.recv().await, None);
        assert!(band
            .read_characteristic(profile.battery_characteristic)
            .await
            .unwrap_err()
            .is_disconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_stream_starts_on_command() {
        let profile = DeviceProfile::default();
        let band = band().with_heart_rate_stream(65, Duration::from_secs(1));
        let mut rx = band.subscribe(profile.heart_rate_measurement).await.unwrap();

        band.write_characteristic(profile.heart_rate_control, &profile.start_heart_rate, true)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(vec![0, 65]));
        assert_eq!(rx.recv().await, Some(vec![0, 65]));

        band.unsubscribe(profile.heart_rate_measurement).await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_connector_hands_out_bands_in_order() {
        let first = Arc::new(band());
        let connector = SimulatedConnector::with_bands([first]);

        let link = connector.acquire().await.unwrap();
        link.connect().await.unwrap();
        assert!(connector.acquire().await.is_err());
        assert_eq!(connector.acquisitions(), 2);
    }
}
