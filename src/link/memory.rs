//! In-process loopback transport
//!
//! Offers and answers are opaque tokens registered in a shared
//! [`MemoryNetwork`]; once the offerer applies the answer both ends are wired
//! together with unbounded queues. Used by tests and local demos.

use super::{Channel, Connector, LinkError, LinkEvent, LinkResult, PeerConnection};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

const OFFER_PREFIX: &str = "memory-offer:";
const ANSWER_PREFIX: &str = "memory-answer:";

struct PendingAnswer {
    events: mpsc::UnboundedSender<LinkEvent>,
    opened: oneshot::Sender<(mpsc::UnboundedSender<LinkEvent>, CancellationToken)>,
}

#[derive(Default)]
struct NetworkInner {
    offers: HashMap<String, mpsc::UnboundedSender<LinkEvent>>,
    answers: HashMap<String, PendingAnswer>,
    links: Vec<CancellationToken>,
}

/// Shared switchboard for memory peers
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every established link, as if connectivity vanished. Both ends
    /// observe `LinkEvent::Lost`.
    pub async fn sever_all(&self) {
        let mut inner = self.inner.lock().await;
        for link in inner.links.drain(..) {
            link.cancel();
        }
    }

    /// Number of links currently wired up
    pub async fn link_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.links.retain(|l| !l.is_cancelled());
        inner.links.len()
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl MemoryConnector {
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn new_peer(&self) -> LinkResult<Box<dyn PeerConnection>> {
        Ok(Box::new(MemoryPeer::new(self.network.clone())))
    }
}

#[derive(Default)]
struct PeerSlots {
    local_sdp: Option<String>,
    remote: Option<mpsc::UnboundedSender<LinkEvent>>,
    link: Option<CancellationToken>,
    inbound: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    opened: Option<oneshot::Receiver<(mpsc::UnboundedSender<LinkEvent>, CancellationToken)>>,
}

struct MemoryPeer {
    network: MemoryNetwork,
    events: mpsc::UnboundedSender<LinkEvent>,
    slots: Mutex<PeerSlots>,
}

impl MemoryPeer {
    fn new(network: MemoryNetwork) -> Self {
        let (events, inbound) = mpsc::unbounded_channel();
        Self {
            network,
            events,
            slots: Mutex::new(PeerSlots {
                inbound: Some(inbound),
                ..Default::default()
            }),
        }
    }
}

/// Pump local writes to the remote until either side goes away
fn spawn_forwarder(
    mut outbound: mpsc::UnboundedReceiver<String>,
    local: mpsc::UnboundedSender<LinkEvent>,
    remote: mpsc::UnboundedSender<LinkEvent>,
    link: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = link.cancelled() => {
                    let _ = local.send(LinkEvent::Lost);
                    return;
                }
                msg = outbound.recv() => match msg {
                    Some(text) => {
                        if remote.send(LinkEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = remote.send(LinkEvent::Lost);
                        return;
                    }
                },
            }
        }
    });
}

#[async_trait]
impl PeerConnection for MemoryPeer {
    async fn create_offer(&self) -> LinkResult<()> {
        let token = format!("{}{}", OFFER_PREFIX, ulid::Ulid::new());
        self.network
            .inner
            .lock()
            .await
            .offers
            .insert(token.clone(), self.events.clone());
        self.slots.lock().await.local_sdp = Some(token);
        Ok(())
    }

    async fn accept_offer(&self, offer: &str) -> LinkResult<()> {
        let token = format!("{}{}", ANSWER_PREFIX, ulid::Ulid::new());
        let (opened_tx, opened_rx) = oneshot::channel();
        {
            let mut inner = self.network.inner.lock().await;
            if !inner.offers.contains_key(offer) {
                return Err(LinkError::Transport(format!("unknown offer {:?}", offer)));
            }
            inner.answers.insert(
                token.clone(),
                PendingAnswer {
                    events: self.events.clone(),
                    opened: opened_tx,
                },
            );
        }
        let mut slots = self.slots.lock().await;
        slots.local_sdp = Some(token);
        slots.opened = Some(opened_rx);
        Ok(())
    }

    async fn gathering_complete(&self) -> LinkResult<String> {
        self.slots
            .lock()
            .await
            .local_sdp
            .clone()
            .ok_or_else(|| LinkError::Transport("no local description".to_string()))
    }

    async fn apply_answer(&self, answer: &str) -> LinkResult<()> {
        let mut slots = self.slots.lock().await;
        let offer = slots.local_sdp.clone().unwrap_or_default();
        let link = CancellationToken::new();
        let pending = {
            let mut inner = self.network.inner.lock().await;
            let pending = inner
                .answers
                .remove(answer)
                .ok_or_else(|| LinkError::Transport(format!("unknown answer {:?}", answer)))?;
            inner.offers.remove(&offer);
            inner.links.retain(|l| !l.is_cancelled());
            inner.links.push(link.clone());
            pending
        };
        pending
            .opened
            .send((self.events.clone(), link.clone()))
            .map_err(|_| LinkError::ChannelClosed)?;
        slots.remote = Some(pending.events);
        slots.link = Some(link);
        Ok(())
    }

    async fn channel_open(&self) -> LinkResult<Channel> {
        let mut slots = self.slots.lock().await;
        if slots.remote.is_none() {
            let opened = slots.opened.take().ok_or(LinkError::ChannelClosed)?;
            // Release the lock while the offerer finishes its side
            drop(slots);
            let (remote, link) = opened.await.map_err(|_| LinkError::ChannelClosed)?;
            slots = self.slots.lock().await;
            slots.remote = Some(remote);
            slots.link = Some(link);
        }
        let remote = slots.remote.clone().ok_or(LinkError::ChannelClosed)?;
        let link = slots.link.clone().ok_or(LinkError::ChannelClosed)?;
        let inbound = slots.inbound.take().ok_or(LinkError::ChannelClosed)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        spawn_forwarder(outbound_rx, self.events.clone(), remote, link);
        Ok(Channel { outbound, inbound })
    }

    async fn close(&self) {
        let mut slots = self.slots.lock().await;
        if let Some(remote) = slots.remote.take() {
            let _ = remote.send(LinkEvent::Lost);
        }
        if let Some(link) = slots.link.take() {
            link.cancel();
        }
        if let Some(offer) = slots.local_sdp.take() {
            let mut inner = self.network.inner.lock().await;
            inner.offers.remove(&offer);
            inner.answers.remove(&offer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(network: &MemoryNetwork) -> (Box<dyn PeerConnection>, Channel, Box<dyn PeerConnection>, Channel) {
        let connector = MemoryConnector::new(network.clone());
        let host = connector.new_peer().await.unwrap();
        let client = connector.new_peer().await.unwrap();

        host.create_offer().await.unwrap();
        let offer = host.gathering_complete().await.unwrap();
        client.accept_offer(&offer).await.unwrap();
        let answer = client.gathering_complete().await.unwrap();
        host.apply_answer(&answer).await.unwrap();

        let host_channel = host.channel_open().await.unwrap();
        let client_channel = client.channel_open().await.unwrap();
        (host, host_channel, client, client_channel)
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let network = MemoryNetwork::new();
        let (_host, mut host_ch, _client, mut client_ch) = pair(&network).await;

        host_ch.outbound.send("v3".to_string()).unwrap();
        client_ch.outbound.send("nalice".to_string()).unwrap();

        assert_eq!(
            client_ch.inbound.recv().await,
            Some(LinkEvent::Message("v3".to_string()))
        );
        assert_eq!(
            host_ch.inbound.recv().await,
            Some(LinkEvent::Message("nalice".to_string()))
        );
        assert_eq!(network.link_count().await, 1);
    }

    #[tokio::test]
    async fn test_dropping_outbound_signals_loss() {
        let network = MemoryNetwork::new();
        let (_host, host_ch, _client, mut client_ch) = pair(&network).await;

        drop(host_ch);
        assert_eq!(client_ch.inbound.recv().await, Some(LinkEvent::Lost));
    }

    #[tokio::test]
    async fn test_sever_reaches_both_ends() {
        let network = MemoryNetwork::new();
        let (_host, mut host_ch, _client, mut client_ch) = pair(&network).await;

        network.sever_all().await;
        assert_eq!(host_ch.inbound.recv().await, Some(LinkEvent::Lost));
        assert_eq!(client_ch.inbound.recv().await, Some(LinkEvent::Lost));
        assert_eq!(network.link_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_links_pruned_on_reconnect() {
        let network = MemoryNetwork::new();
        for _ in 0..3 {
            let (host, _host_ch, _client, _client_ch) = pair(&network).await;
            host.close().await;
        }
        let _live = pair(&network).await;
        assert_eq!(network.inner.lock().await.links.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_offer_rejected() {
        let network = MemoryNetwork::new();
        let peer = MemoryConnector::new(network).new_peer().await.unwrap();
        let result = peer.accept_offer("memory-offer:nope").await;
        assert!(matches!(result, Err(LinkError::Transport(_))));
    }
}
