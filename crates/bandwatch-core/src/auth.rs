//! Challenge/response authentication over the link.
//!
//! The band proves nothing; we prove possession of the shared key:
//!
//! 1. subscribe to the auth characteristic
//! 2. write "request challenge"
//! 3. wait (bounded) for a notification starting with the challenge marker
//! 4. encrypt the 16-byte challenge with the shared key
//! 5. write "submit response" followed by the ciphertext
//!
//! A successful final write is treated as success; the band sends no
//! separate acknowledgement.

use std::time::Duration;

use tracing::{debug, info};

use crate::cipher::{self, BLOCK_LEN};
use crate::config::DeviceProfile;
use crate::error::{BandwatchError, Result};
use crate::link::{Link, LinkError, Notifications};

/// A challenge received from the band. Consumed by [`AuthNegotiator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge([u8; BLOCK_LEN]);

impl Challenge {
    /// Extract a challenge from an auth notification.
    ///
    /// Returns `None` when the payload does not start with `marker`.
    ///
    /// # Errors
    ///
    /// Returns [`BandwatchError::InvalidInput`] when the marker matches but
    /// the challenge is not exactly 16 bytes.
    pub fn from_notification(payload: &[u8], marker: &[u8]) -> Option<Result<Self>> {
        let body = payload.strip_prefix(marker)?;
        Some(
            <[u8; BLOCK_LEN]>::try_from(body)
                .map(Self)
                .map_err(|_| {
                    BandwatchError::InvalidInput(format!(
                        "challenge must be {BLOCK_LEN} bytes, got {}",
                        body.len()
                    ))
                }),
        )
    }

    /// Raw challenge bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        &self.0
    }
}

/// Drives the handshake for one session.
#[derive(Debug, Clone)]
pub struct AuthNegotiator<'a> {
    profile: &'a DeviceProfile,
    key: [u8; BLOCK_LEN],
    timeout: Duration,
}

impl<'a> AuthNegotiator<'a> {
    /// Create a negotiator for the given device profile and shared key.
    #[must_use]
    pub const fn new(profile: &'a DeviceProfile, key: [u8; BLOCK_LEN], timeout: Duration) -> Self {
        Self {
            profile,
            key,
            timeout,
        }
    }

    /// Run the handshake to completion.
    ///
    /// # Errors
    ///
    /// - [`BandwatchError::Link`] if any subscribe or write fails, or the
    ///   auth notification stream closes.
    /// - [`BandwatchError::AuthTimeout`] if no challenge arrives in time.
    /// - [`BandwatchError::InvalidInput`] for a malformed challenge.
    pub async fn authenticate(&self, link: &dyn Link) -> Result<()> {
        let auth = self.profile.auth_characteristic;

        let mut notifications = link.subscribe(auth).await?;
        link.write_characteristic(auth, &self.profile.request_challenge, false)
            .await?;
        debug!("challenge requested");

        let challenge = tokio::time::timeout(self.timeout, self.next_challenge(&mut notifications))
            .await
            .map_err(|_| BandwatchError::AuthTimeout {
                waited_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        let response = cipher::encrypt(&self.key, challenge.as_bytes())?;
        let mut payload = Vec::with_capacity(self.profile.submit_response.len() + BLOCK_LEN);
        payload.extend_from_slice(&self.profile.submit_response);
        payload.extend_from_slice(&response);
        link.write_characteristic(auth, &payload, false).await?;

        info!("authenticated");
        Ok(())
    }

    async fn next_challenge(&self, notifications: &mut Notifications) -> Result<Challenge> {
        loop {
            let payload = notifications
                .recv()
                .await
                .ok_or_else(|| LinkError::disconnected("auth notification stream closed"))?;
            match Challenge::from_notification(&payload, &self.profile.challenge_marker) {
                Some(challenge) => return challenge,
                None => debug!(len = payload.len(), "ignoring non-challenge auth notification"),
            }
        }
    }
}
