//! Link establishment
//!
//! Turns one rendezvous exchange into an open, ordered, reliable text channel.
//! The host runs one [`establish_host`] per accepted slot; a client runs
//! [`establish_client`] under the retry supervisor until it gets a link.
//! Both sides wait for local ICE gathering to finish before uploading their
//! SDP so the relay only ever carries single-shot values.

pub mod memory;
pub mod webrtc;

use crate::rendezvous::{Published, RendezvousClient, RendezvousError, RendezvousKey};
use crate::retry::Retryable;
use crate::types::SlotId;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use memory::{MemoryConnector, MemoryNetwork};
pub use webrtc::WebRtcConnector;

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transport: {0}")]
    Transport(String),

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    #[error("invalid slot id {0:?}")]
    BadSlot(String),

    #[error("channel closed before it opened")]
    ChannelClosed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("cancelled")]
    Cancelled,
}

impl Retryable for LinkError {
    fn is_cancelled(&self) -> bool {
        matches!(
            self,
            LinkError::Cancelled | LinkError::Rendezvous(RendezvousError::Cancelled)
        )
    }

    fn cancelled() -> Self {
        LinkError::Cancelled
    }
}

/// What arrives from the far side of an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(String),
    /// Connectivity lost or the remote closed the channel
    Lost,
}

/// An open message channel. Dropping `outbound` closes the channel.
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// One transport-level connection, owned by whoever created it
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Offerer side: create the data channel and set the local offer
    async fn create_offer(&self) -> LinkResult<()>;

    /// Answerer side: apply the remote offer and set the local answer
    async fn accept_offer(&self, offer: &str) -> LinkResult<()>;

    /// Wait for local ICE gathering to complete, then return the full local SDP
    async fn gathering_complete(&self) -> LinkResult<String>;

    async fn apply_answer(&self, answer: &str) -> LinkResult<()>;

    /// Wait until the data channel is open and hand it out (once)
    async fn channel_open(&self) -> LinkResult<Channel>;

    async fn close(&self);
}

/// Factory for fresh peer connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn new_peer(&self) -> LinkResult<Box<dyn PeerConnection>>;
}

/// An established link
pub struct Link {
    pub slot: SlotId,
    pub peer: Box<dyn PeerConnection>,
    pub channel: Channel,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("slot", &self.slot).finish()
    }
}

/// Host side negotiation states, one instance per slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostLinkState {
    CreatingOffer,
    AwaitingIceComplete,
    UploadingOffer,
    AwaitingRemoteAnswer,
    ApplyingRemoteAnswer,
    AwaitingChannelOpen,
    Open,
    Failed(String),
}

impl fmt::Display for HostLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostLinkState::CreatingOffer => write!(f, "creating local offer"),
            HostLinkState::AwaitingIceComplete => write!(f, "awaiting ice gathering"),
            HostLinkState::UploadingOffer => write!(f, "uploading offer"),
            HostLinkState::AwaitingRemoteAnswer => write!(f, "awaiting client's answer"),
            HostLinkState::ApplyingRemoteAnswer => write!(f, "applying client's answer"),
            HostLinkState::AwaitingChannelOpen => write!(f, "establishing connection"),
            HostLinkState::Open => write!(f, "open"),
            HostLinkState::Failed(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Client side negotiation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLinkState {
    AwaitingSlot,
    AwaitingRemoteOffer,
    CreatingAnswer,
    AwaitingIceComplete,
    UploadingAnswer,
    AwaitingChannelOpen,
    Open,
}

impl fmt::Display for ClientLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientLinkState::AwaitingSlot => "awaiting server's signal",
            ClientLinkState::AwaitingRemoteOffer => "awaiting server's offer",
            ClientLinkState::CreatingAnswer => "creating answer",
            ClientLinkState::AwaitingIceComplete => "awaiting ice gathering",
            ClientLinkState::UploadingAnswer => "sending answer",
            ClientLinkState::AwaitingChannelOpen => "establishing connection",
            ClientLinkState::Open => "open",
        };
        f.write_str(s)
    }
}

/// Long-poll and negotiation limits
#[derive(Debug, Clone, Copy)]
pub struct LinkTimeouts {
    /// Relay timeout for the per-slot offer/answer exchange
    pub exchange: Duration,
    /// Relay timeout while a client waits for the host to advertise a slot
    pub next_id: Duration,
    pub ice_gathering: Duration,
    pub channel_open: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            exchange: Duration::from_secs(5),
            next_id: Duration::from_secs(600),
            ice_gathering: Duration::from_secs(10),
            channel_open: Duration::from_secs(30),
        }
    }
}

/// Await `fut` unless the limit passes or the session is cancelled
async fn within<T, F>(
    limit: Duration,
    what: &'static str,
    cancel: &CancellationToken,
    fut: F,
) -> LinkResult<T>
where
    F: Future<Output = LinkResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LinkError::Cancelled),
        r = tokio::time::timeout(limit, fut) => r.map_err(|_| LinkError::Timeout(what))?,
    }
}

/// Negotiate the host side of one slot. Never retries: a failed slot is
/// reported and the client has to come back for a fresh one.
pub async fn establish_host(
    slot: SlotId,
    connector: &dyn Connector,
    rendezvous: &RendezvousClient,
    timeouts: &LinkTimeouts,
    cancel: &CancellationToken,
    report: &(dyn Fn(HostLinkState) + Send + Sync),
) -> LinkResult<Link> {
    report(HostLinkState::CreatingOffer);
    let peer = connector.new_peer().await?;
    match negotiate_host(slot, peer.as_ref(), rendezvous, timeouts, cancel, report).await {
        Ok(channel) => {
            report(HostLinkState::Open);
            Ok(Link {
                slot,
                peer,
                channel,
            })
        }
        Err(e) => {
            peer.close().await;
            Err(e)
        }
    }
}

async fn negotiate_host(
    slot: SlotId,
    peer: &dyn PeerConnection,
    rendezvous: &RendezvousClient,
    timeouts: &LinkTimeouts,
    cancel: &CancellationToken,
    report: &(dyn Fn(HostLinkState) + Send + Sync),
) -> LinkResult<Channel> {
    peer.create_offer().await?;

    report(HostLinkState::AwaitingIceComplete);
    let offer = within(
        timeouts.ice_gathering,
        "ice gathering",
        cancel,
        peer.gathering_complete(),
    )
    .await?;

    report(HostLinkState::UploadingOffer);
    let published = rendezvous
        .publish(&RendezvousKey::Offer(slot), &offer, Some(timeouts.exchange), cancel)
        .await?;
    if published == Published::NotDelivered {
        return Err(LinkError::Timeout("client to read the offer"));
    }

    report(HostLinkState::AwaitingRemoteAnswer);
    let answer = rendezvous
        .await_value(&RendezvousKey::Answer(slot), timeouts.exchange, cancel)
        .await?
        .ok_or(LinkError::Timeout("client's answer"))?;

    report(HostLinkState::ApplyingRemoteAnswer);
    peer.apply_answer(&answer).await?;

    report(HostLinkState::AwaitingChannelOpen);
    within(
        timeouts.channel_open,
        "channel open",
        cancel,
        peer.channel_open(),
    )
    .await
}

/// One client join attempt. `Ok(None)` means the host advertised nothing
/// within the long-poll window, which the supervisor retries immediately.
pub async fn establish_client(
    connector: &dyn Connector,
    rendezvous: &RendezvousClient,
    timeouts: &LinkTimeouts,
    cancel: &CancellationToken,
    report: &(dyn Fn(ClientLinkState) + Send + Sync),
) -> LinkResult<Option<Link>> {
    report(ClientLinkState::AwaitingSlot);
    let Some(raw_slot) = rendezvous
        .await_value(&RendezvousKey::NextId, timeouts.next_id, cancel)
        .await?
    else {
        return Ok(None);
    };
    let slot: SlotId = raw_slot
        .trim()
        .parse()
        .map_err(|_| LinkError::BadSlot(raw_slot.clone()))?;
    tracing::debug!("Got slot {} from the host", slot);

    report(ClientLinkState::AwaitingRemoteOffer);
    let offer = rendezvous
        .await_value(&RendezvousKey::Offer(slot), timeouts.exchange, cancel)
        .await?
        .ok_or(LinkError::Timeout("host's offer"))?;

    report(ClientLinkState::CreatingAnswer);
    let peer = connector.new_peer().await?;
    match negotiate_client(slot, &offer, peer.as_ref(), rendezvous, timeouts, cancel, report).await
    {
        Ok(channel) => {
            report(ClientLinkState::Open);
            Ok(Some(Link {
                slot,
                peer,
                channel,
            }))
        }
        Err(e) => {
            peer.close().await;
            Err(e)
        }
    }
}

async fn negotiate_client(
    slot: SlotId,
    offer: &str,
    peer: &dyn PeerConnection,
    rendezvous: &RendezvousClient,
    timeouts: &LinkTimeouts,
    cancel: &CancellationToken,
    report: &(dyn Fn(ClientLinkState) + Send + Sync),
) -> LinkResult<Channel> {
    peer.accept_offer(offer).await?;

    report(ClientLinkState::AwaitingIceComplete);
    let answer = within(
        timeouts.ice_gathering,
        "ice gathering",
        cancel,
        peer.gathering_complete(),
    )
    .await?;

    report(ClientLinkState::UploadingAnswer);
    let published = rendezvous
        .publish(&RendezvousKey::Answer(slot), &answer, None, cancel)
        .await?;
    if published == Published::NotDelivered {
        return Err(LinkError::Timeout("host to read the answer"));
    }

    report(ClientLinkState::AwaitingChannelOpen);
    within(
        timeouts.channel_open,
        "channel open",
        cancel,
        peer.channel_open(),
    )
    .await
}
