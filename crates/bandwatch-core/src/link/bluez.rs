//! [`Link`] over BlueZ, via `bluer`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Address, Device};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Link, LinkConnector, LinkError, Notifications, NOTIFICATION_CHANNEL_CAPACITY};

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        classify("bluez")(err)
    }
}

fn classify(operation: &'static str) -> impl Fn(bluer::Error) -> LinkError {
    move |err| match err.kind {
        bluer::ErrorKind::NotConnected => LinkError::disconnected(format!("{operation}: {err}")),
        _ => LinkError::Io {
            operation,
            message: err.to_string(),
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires BlueZ links to one device address.
#[derive(Debug, Clone)]
pub struct BluezConnector {
    address: Address,
    adapter: Option<String>,
}

impl BluezConnector {
    /// Create a connector for `address` on the named adapter, or the default one.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidAddress`] if the address does not parse.
    pub fn new(address: &str, adapter: Option<String>) -> Result<Self, LinkError> {
        let address = address
            .parse::<Address>()
            .map_err(|_| LinkError::InvalidAddress {
                address: address.to_string(),
            })?;
        Ok(Self { address, adapter })
    }
}

#[async_trait]
impl LinkConnector for BluezConnector {
    async fn acquire(&self) -> Result<Arc<dyn Link>, LinkError> {
        let unavailable = |err: bluer::Error| LinkError::AdapterUnavailable {
            message: err.to_string(),
        };
        let session = bluer::Session::new().await.map_err(unavailable)?;
        let adapter = match &self.adapter {
            Some(name) => session.adapter(name).map_err(unavailable)?,
            None => session.default_adapter().await.map_err(unavailable)?,
        };
        adapter.set_powered(true).await.map_err(unavailable)?;
        debug!(adapter = adapter.name(), address = %self.address, "adapter ready");

        let device = adapter.device(self.address).map_err(unavailable)?;
        Ok(Arc::new(BluezLink {
            _session: session,
            address: self.address,
            device,
            characteristics: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(HashMap::new()),
        }))
    }
}

/// One BlueZ connection to the band.
pub struct BluezLink {
    _session: bluer::Session,
    address: Address,
    device: Device,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    forwarders: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl BluezLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, LinkError> {
        lock(&self.characteristics)
            .get(&uuid)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound { uuid })
    }

    async fn wait_for_services(&self) -> Result<(), LinkError> {
        let resolved = async {
            loop {
                if self.device.is_services_resolved().await? {
                    return Ok::<_, LinkError>(());
                }
                tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(SERVICES_RESOLVE_TIMEOUT, resolved)
            .await
            .map_err(|_| LinkError::ServicesUnresolved {
                waited_secs: SERVICES_RESOLVE_TIMEOUT.as_secs(),
            })?
    }

    async fn discover(&self) -> Result<(), LinkError> {
        let discover = classify("discover");
        let mut found = HashMap::new();
        for service in self.device.services().await.map_err(&discover)? {
            for characteristic in service.characteristics().await.map_err(&discover)? {
                let uuid = characteristic.uuid().await.map_err(&discover)?;
                found.insert(uuid, characteristic);
            }
        }
        debug!(count = found.len(), "characteristics discovered");
        *lock(&self.characteristics) = found;
        Ok(())
    }
}

#[async_trait]
impl Link for BluezLink {
    async fn connect(&self) -> Result<(), LinkError> {
        let connected = self.device.is_connected().await?;
        if !connected {
            self.device
                .connect()
                .await
                .map_err(|err| LinkError::ConnectFailed {
                    address: self.address.to_string(),
                    message: err.to_string(),
                })?;
        }
        self.wait_for_services().await?;
        self.discover().await?;
        info!(address = %self.address, "connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        for (_, token) in lock(&self.forwarders).drain() {
            token.cancel();
        }
        self.device
            .disconnect()
            .await
            .map_err(classify("disconnect"))
    }

    async fn write_characteristic(
        &self,
        uuid: Uuid,
        bytes: &[u8],
        needs_ack: bool,
    ) -> Result<(), LinkError> {
        let request = CharacteristicWriteRequest {
            op_type: if needs_ack {
                WriteOp::Request
            } else {
                WriteOp::Command
            },
            ..Default::default()
        };
        self.characteristic(uuid)?
            .write_ext(bytes, &request)
            .await
            .map_err(classify("write"))
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, LinkError> {
        self.characteristic(uuid)?
            .read()
            .await
            .map_err(classify("read"))
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<Notifications, LinkError> {
        let stream = self
            .characteristic(uuid)?
            .notify()
            .await
            .map_err(classify("subscribe"))?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.forwarders).insert(uuid, token.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(value) => {
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            warn!(%uuid, "notification stream ended");
                            break;
                        }
                    },
                }
            }
        });
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), LinkError> {
        if let Some(token) = lock(&self.forwarders).remove(&uuid) {
            token.cancel();
        }
        Ok(())
    }
}
