//! Host actor
//!
//! One task owns the [`HostState`]. The advertise loop, the per-slot link
//! tasks and the channel readers only feed it events, so every mutation and
//! its broadcast happen in one uninterrupted step.

use super::{SessionContext, CLOSE_FLUSH};
use crate::deck::Deck;
use crate::link::{establish_host, Channel, HostLinkState, Link, LinkEvent, PeerConnection};
use crate::protocol::ClientMessage;
use crate::rendezvous::{Published, RendezvousError, RendezvousKey};
use crate::retry::Retryable;
use crate::state::{GameView, HostState, Outbound};
use crate::store::SaveStore;
use crate::types::{Intent, PeerId, Question, SlotId};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum HostEvent {
    /// Advertise loop diagnostics; empty once a slot was picked up
    Advertise(String),
    Negotiating {
        peer: PeerId,
        state: HostLinkState,
    },
    Opened {
        peer: PeerId,
        outbound: mpsc::UnboundedSender<String>,
        transport: Box<dyn PeerConnection>,
    },
    Failed {
        peer: PeerId,
        reason: String,
    },
    Message {
        peer: PeerId,
        message: ClientMessage,
    },
    Lost {
        peer: PeerId,
    },
    Remove {
        peer: PeerId,
    },
    Intent(Intent),
    Stop,
}

struct LiveLink {
    outbound: mpsc::UnboundedSender<String>,
    transport: Box<dyn PeerConnection>,
}

/// Control surface of a running host session
pub struct HostHandle {
    session: String,
    events: mpsc::UnboundedSender<HostEvent>,
    views: watch::Receiver<GameView>,
    actor: JoinHandle<()>,
}

impl HostHandle {
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Apply an action of the host's own player
    pub fn intent(&self, intent: Intent) {
        if self.events.send(HostEvent::Intent(intent)).is_err() {
            tracing::debug!("Host session already stopped, dropping intent");
        }
    }

    /// The host's own view, updated after every state change
    pub fn views(&self) -> watch::Receiver<GameView> {
        self.views.clone()
    }

    /// Notify every client with `x`, close all links and wait for the actor
    pub async fn stop(self) {
        let _ = self.events.send(HostEvent::Stop);
        if let Err(e) = self.actor.await {
            tracing::error!("Host actor panicked: {}", e);
        }
    }
}

/// Start hosting: spawns the state actor and the advertise loop
pub fn host(ctx: SessionContext, state: HostState) -> HostHandle {
    let (events, inbox) = mpsc::unbounded_channel();
    let (views_tx, views) = watch::channel(state.view());

    tracing::info!("Hosting session {}", ctx.rendezvous.session());

    let actor = HostActor {
        ctx: ctx.clone(),
        state,
        links: HashMap::new(),
        advertise_status: String::new(),
        events: events.clone(),
        views: views_tx,
    };
    let actor = tokio::spawn(actor.run(inbox));
    tokio::spawn(advertise(ctx.clone(), events.clone()));

    HostHandle {
        session: ctx.rendezvous.session().to_string(),
        events,
        views,
        actor,
    }
}

/// Build the deck, resuming from the stored savegame when there is one
pub fn restore_deck(
    questions: Vec<Question>,
    categories: Option<Vec<String>>,
    seed: u64,
    store: &dyn SaveStore,
) -> Deck {
    match store.load() {
        Ok(Some(save)) => {
            tracing::info!(
                "Resuming saved game at question {} (seed {})",
                save.question_index,
                save.seed
            );
            Deck::resume(questions, categories, save)
        }
        Ok(None) => Deck::new(questions, categories, seed),
        Err(e) => {
            tracing::warn!("Ignoring unreadable savegame: {}", e);
            Deck::new(questions, categories, seed)
        }
    }
}

/// Publish increasing slot ids under the next-id key. Each pickup starts a
/// link task for that slot; the id only advances once a client took it.
async fn advertise(ctx: SessionContext, events: mpsc::UnboundedSender<HostEvent>) {
    let supervisor = ctx.supervisor();
    let report = |status: String| {
        let _ = events.send(HostEvent::Advertise(status));
    };
    let mut slot: SlotId = 1;

    loop {
        let value = slot.to_string();
        let advertised: Result<(), RendezvousError> = supervisor
            .run("advertise", &report, || async {
                ctx.rendezvous
                    .publish(&RendezvousKey::NextId, &value, None, &ctx.cancel)
                    .await
                    .map(|published| (published == Published::Delivered).then_some(()))
            })
            .await;
        if advertised.is_err() {
            tracing::debug!("Advertise loop cancelled");
            return;
        }

        tracing::info!("A client picked up slot {}", slot);
        let _ = events.send(HostEvent::Advertise(String::new()));
        tokio::spawn(run_slot(slot, ctx.clone(), events.clone()));
        slot += 1;
    }
}

/// Negotiate one slot, then pump its channel into the actor until it drops
async fn run_slot(slot: SlotId, ctx: SessionContext, events: mpsc::UnboundedSender<HostEvent>) {
    let peer = PeerId::from(slot);
    let report = |state: HostLinkState| {
        let _ = events.send(HostEvent::Negotiating { peer, state });
    };

    let link = match establish_host(
        slot,
        ctx.connector.as_ref(),
        &ctx.rendezvous,
        &ctx.timeouts,
        &ctx.cancel,
        &report,
    )
    .await
    {
        Ok(link) => link,
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
            tracing::error!("{} failed to connect: {}", peer, e);
            let _ = events.send(HostEvent::Failed {
                peer,
                reason: e.to_string(),
            });
            return;
        }
    };

    let Link {
        peer: transport,
        channel,
        ..
    } = link;
    let Channel {
        outbound,
        mut inbound,
    } = channel;
    let opened = HostEvent::Opened {
        peer,
        outbound,
        transport,
    };
    if let Err(mpsc::error::SendError(HostEvent::Opened { transport, .. })) = events.send(opened) {
        transport.close().await;
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            event = inbound.recv() => match event {
                Some(LinkEvent::Message(raw)) => {
                    let message = ClientMessage::decode(&raw);
                    if events.send(HostEvent::Message { peer, message }).is_err() {
                        return;
                    }
                }
                Some(LinkEvent::Lost) | None => {
                    let _ = events.send(HostEvent::Lost { peer });
                    return;
                }
            },
        }
    }
}

struct HostActor {
    ctx: SessionContext,
    state: HostState,
    links: HashMap<PeerId, LiveLink>,
    advertise_status: String,
    events: mpsc::UnboundedSender<HostEvent>,
    views: watch::Sender<GameView>,
}

impl HostActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<HostEvent>) {
        self.refresh();
        loop {
            let event = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                event = inbox.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if !self.handle(event) {
                break;
            }
            self.refresh();
        }
        self.teardown().await;
    }

    /// Returns false once the session should stop
    fn handle(&mut self, event: HostEvent) -> bool {
        let outbound = match event {
            HostEvent::Advertise(status) => {
                self.advertise_status = status;
                Vec::new()
            }
            HostEvent::Negotiating { peer, state } => {
                self.state.peer_negotiating(peer, state.to_string());
                Vec::new()
            }
            HostEvent::Opened {
                peer,
                outbound,
                transport,
            } => {
                self.links.insert(
                    peer,
                    LiveLink {
                        outbound,
                        transport,
                    },
                );
                self.state.peer_opened(peer)
            }
            HostEvent::Failed { peer, reason } => self.state.peer_failed(peer, reason),
            HostEvent::Message { peer, message } => self.state.handle_message(peer, message),
            HostEvent::Lost { peer } => self.state.peer_failed(peer, "lost connection".to_string()),
            HostEvent::Remove { peer } => {
                if self.state.remove_peer(peer) {
                    tracing::debug!("Forgot {}", peer);
                }
                Vec::new()
            }
            HostEvent::Intent(intent) => self.state.local_intent(intent),
            HostEvent::Stop => return false,
        };
        self.apply(outbound);
        true
    }

    /// Carry out side effects; returns the transport close tasks it started
    fn apply(&mut self, outbound: Vec<Outbound>) -> Vec<JoinHandle<()>> {
        let mut closing = Vec::new();
        for out in outbound {
            match out {
                Outbound::Send { to, message } => {
                    let Some(link) = self.links.get(&to) else {
                        continue;
                    };
                    if link.outbound.send(message.encode()).is_err() {
                        tracing::debug!("{} channel already closed", to);
                    }
                }
                Outbound::Drop { peer, reason } => {
                    tracing::debug!("Dropping {}: {}", peer, reason);
                    if let Some(link) = self.links.remove(&peer) {
                        closing.push(close_link(link));
                    }
                    self.schedule_removal(peer);
                }
            }
        }
        closing
    }

    fn schedule_removal(&self, peer: PeerId) {
        let events = self.events.clone();
        let cancel = self.ctx.cancel.clone();
        let grace = self.ctx.failed_peer_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    let _ = events.send(HostEvent::Remove { peer });
                }
            }
        });
    }

    fn refresh(&self) {
        let view = self.state.view();
        self.ctx.renderer.render(&view);
        self.views.send_replace(view);

        self.ctx
            .renderer
            .network_status(&host_status(&self.state, &self.advertise_status));
    }

    async fn teardown(&mut self) {
        tracing::info!("Stopping session {}", self.ctx.rendezvous.session());
        let outbound = self.state.shutdown();
        let closing = self.apply(outbound);
        for (_, link) in self.links.drain() {
            drop(link.outbound);
            link.transport.close().await;
        }
        self.ctx.cancel.cancel();
        futures::future::join_all(closing).await;
        self.refresh();
    }
}

/// Status line, kick notice, advertise diagnostics and link diagnostics
fn host_status(state: &HostState, advertise_status: &str) -> String {
    let mut parts = vec![state.status_line()];
    if state.self_kicked() {
        parts.push("you were kicked out due to inactivity, set a name to rejoin".to_string());
    }
    if !advertise_status.is_empty() {
        parts.push(advertise_status.to_string());
    }
    let links = state.network_status();
    if !links.is_empty() {
        parts.push(links);
    }
    parts.join("; ")
}

/// Let queued messages drain, then close the transport
fn close_link(link: LiveLink) -> JoinHandle<()> {
    let LiveLink {
        outbound,
        transport,
    } = link;
    drop(outbound);
    tokio::spawn(async move {
        tokio::time::sleep(CLOSE_FLUSH).await;
        transport.close().await;
    })
}
