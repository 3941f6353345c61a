//! Rendezvous relay client
//!
//! Talks to a long-poll key/value relay to pass SDP blobs and the next-slot
//! counter between two peers that cannot reach each other yet. Calls are
//! single-shot; retrying is the caller's business (see `retry`).

use crate::types::SlotId;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Extra time granted to the HTTP request on top of the relay-side long-poll
const REQUEST_GRACE: Duration = Duration::from_secs(10);

/// Relay timeout used when a `set` does not name one
const DEFAULT_SET_TIMEOUT: Duration = Duration::from_secs(60);

pub type RendezvousResult<T> = Result<T, RendezvousError>;

#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("code already taken by another host")]
    SlotTaken,

    #[error("relay answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("cancelled")]
    Cancelled,
}

/// Relay keys, all namespaced by the app prefix and the session code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousKey {
    NextId,
    Offer(SlotId),
    Answer(SlotId),
}

/// What happened to a published value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// Somebody read it
    Delivered,
    /// Nobody picked it up within the timeout
    NotDelivered,
}

#[derive(Clone)]
pub struct RendezvousClient {
    base_url: String,
    prefix: String,
    session: String,
    instance: String,
    client: reqwest::Client,
}

impl fmt::Debug for RendezvousClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousClient")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish()
    }
}

impl RendezvousClient {
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            prefix: prefix.into(),
            session: session.into(),
            instance: ulid::Ulid::new().to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Full relay key, e.g. `awocards-1234-7-offer`
    pub fn key(&self, key: &RendezvousKey) -> String {
        match key {
            RendezvousKey::NextId => format!("{}-{}-nextid", self.prefix, self.session),
            RendezvousKey::Offer(slot) => format!("{}-{}-{}-offer", self.prefix, self.session, slot),
            RendezvousKey::Answer(slot) => {
                format!("{}-{}-{}-answer", self.prefix, self.session, slot)
            }
        }
    }

    /// Upload a value and wait until it is read or the relay gives up.
    /// A 409 means another instance already publishes under this key.
    pub async fn publish(
        &self,
        key: &RendezvousKey,
        value: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> RendezvousResult<Published> {
        let full_key = self.key(key);
        let mut query = vec![("set", full_key.clone()), ("instance", self.instance.clone())];
        if let Some(t) = timeout {
            query.push(("timeoutms", t.as_millis().to_string()));
        }
        let request = self
            .client
            .post(&self.base_url)
            .query(&query)
            .timeout(timeout.unwrap_or(DEFAULT_SET_TIMEOUT) + REQUEST_GRACE)
            .body(value.to_string())
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RendezvousError::Cancelled),
            r = request => r?,
        };

        tracing::debug!("publish {} -> {}", full_key, response.status());
        match response.status() {
            StatusCode::OK => Ok(Published::Delivered),
            StatusCode::NO_CONTENT => Ok(Published::NotDelivered),
            StatusCode::CONFLICT => Err(RendezvousError::SlotTaken),
            status => Err(RendezvousError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Long-poll for a value. `Ok(None)` means nothing arrived in time.
    pub async fn await_value(
        &self,
        key: &RendezvousKey,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RendezvousResult<Option<String>> {
        let full_key = self.key(key);
        let request = self
            .client
            .post(&self.base_url)
            .query(&[
                ("get", full_key.clone()),
                ("timeoutms", timeout.as_millis().to_string()),
            ])
            .timeout(timeout + REQUEST_GRACE)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RendezvousError::Cancelled),
            r = request => r?,
        };

        tracing::debug!("await {} -> {}", full_key, response.status());
        match response.status() {
            StatusCode::OK => {
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RendezvousError::Cancelled),
                    b = response.text() => b?,
                };
                Ok(Some(body))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(RendezvousError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
