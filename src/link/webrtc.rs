//! WebRTC data channel transport

use super::{Channel, Connector, LinkError, LinkEvent, LinkResult, PeerConnection};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const CHANNEL_LABEL: &str = "datachannel";

fn transport(e: webrtc::Error) -> LinkError {
    LinkError::Transport(e.to_string())
}

pub struct WebRtcConnector {
    api: API,
    config: RTCConfiguration,
}

impl WebRtcConnector {
    pub fn new(ice_urls: Vec<String>) -> LinkResult<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport)?;
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(transport)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_urls.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_urls,
                ..Default::default()
            }]
        };
        Ok(Self {
            api,
            config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn new_peer(&self) -> LinkResult<Box<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.config.clone())
            .await
            .map_err(transport)?;
        Ok(Box::new(WebRtcPeer::new(Arc::new(pc))))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    opened: Mutex<mpsc::UnboundedReceiver<Arc<RTCDataChannel>>>,
    opened_tx: mpsc::UnboundedSender<Arc<RTCDataChannel>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl WebRtcPeer {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        let (opened_tx, opened) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();

        let lost = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            if matches!(
                state,
                RTCIceConnectionState::Disconnected
                    | RTCIceConnectionState::Failed
                    | RTCIceConnectionState::Closed
            ) {
                tracing::debug!("ICE connection state: {}", state);
                let _ = lost.send(LinkEvent::Lost);
            }
            Box::pin(async {})
        }));

        // Answerer side: the offerer's channel shows up here
        let incoming_events = events.clone();
        let incoming_opened = opened_tx.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            wire_channel(&dc, incoming_events.clone(), incoming_opened.clone());
            Box::pin(async {})
        }));

        Self {
            pc,
            opened: Mutex::new(opened),
            opened_tx,
            inbound: Mutex::new(Some(inbound)),
            events,
        }
    }
}

/// Hook a data channel up to the peer's event queue. Handlers go in before
/// the channel opens so no early message is missed.
fn wire_channel(
    dc: &Arc<RTCDataChannel>,
    events: mpsc::UnboundedSender<LinkEvent>,
    opened: mpsc::UnboundedSender<Arc<RTCDataChannel>>,
) {
    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = message_events.clone();
        Box::pin(async move {
            let _ = tx.send(LinkEvent::Message(
                String::from_utf8_lossy(&msg.data).into_owned(),
            ));
        })
    }));

    dc.on_close(Box::new(move || {
        let _ = events.send(LinkEvent::Lost);
        Box::pin(async {})
    }));

    let open_dc = Arc::downgrade(dc);
    let open_tx = opened.clone();
    dc.on_open(Box::new(move || {
        if let Some(dc) = open_dc.upgrade() {
            let _ = open_tx.send(dc);
        }
        Box::pin(async {})
    }));

    if dc.ready_state() == RTCDataChannelState::Open {
        let _ = opened.send(dc.clone());
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> LinkResult<()> {
        let dc = self
            .pc
            .create_data_channel(CHANNEL_LABEL, None)
            .await
            .map_err(transport)?;
        wire_channel(&dc, self.events.clone(), self.opened_tx.clone());

        let offer = self.pc.create_offer(None).await.map_err(transport)?;
        self.pc.set_local_description(offer).await.map_err(transport)
    }

    async fn accept_offer(&self, offer: &str) -> LinkResult<()> {
        let desc = RTCSessionDescription::offer(offer.to_string()).map_err(transport)?;
        self.pc.set_remote_description(desc).await.map_err(transport)?;
        let answer = self.pc.create_answer(None).await.map_err(transport)?;
        self.pc.set_local_description(answer).await.map_err(transport)
    }

    async fn gathering_complete(&self) -> LinkResult<String> {
        // Resolves at once when gathering already finished
        let mut gather = self.pc.gathering_complete_promise().await;
        let _ = gather.recv().await;
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| LinkError::Transport("no local description".to_string()))
    }

    async fn apply_answer(&self, answer: &str) -> LinkResult<()> {
        let desc = RTCSessionDescription::answer(answer.to_string()).map_err(transport)?;
        self.pc.set_remote_description(desc).await.map_err(transport)
    }

    async fn channel_open(&self) -> LinkResult<Channel> {
        let dc = self
            .opened
            .lock()
            .await
            .recv()
            .await
            .ok_or(LinkError::ChannelClosed)?;
        let inbound = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or(LinkError::ChannelClosed)?;

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = dc.send_text(text).await {
                    tracing::warn!("Data channel send failed: {}", e);
                    break;
                }
            }
            if let Err(e) = dc.close().await {
                tracing::debug!("Data channel close failed: {}", e);
            }
        });

        Ok(Channel { outbound, inbound })
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Peer connection close failed: {}", e);
        }
    }
}
