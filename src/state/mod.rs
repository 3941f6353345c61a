//! Host authoritative session state
//!
//! `HostState` is the single writer of canonical game state. Every event
//! (link change, client message, local intent) is applied synchronously and
//! yields the outbound messages it caused, so no client ever sees an
//! intermediate state.

mod peers;
pub mod reveal;
mod roster;

pub use peers::{LinkPhase, Peer, PeerTable};
pub use reveal::{GameView, PlayerStatus, Reveal, QUORUM};
pub use roster::{PlayerRecord, Roster};

use crate::deck::QuestionSource;
use crate::protocol::{ClientMessage, HostMessage};
use crate::response::{Marker, ResponseBits};
use crate::store::SaveStore;
use crate::types::{validate_name, CardPosition, Intent, PeerId, Question, PROTOCOL_VERSION};

/// Side effects the host actor carries out after a state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send { to: PeerId, message: HostMessage },
    /// Close the peer's transport and forget it after the grace period
    Drop { peer: PeerId, reason: String },
}

pub struct HostState {
    peers: PeerTable,
    roster: Roster,
    deck: Box<dyn QuestionSource>,
    store: Box<dyn SaveStore>,
    self_kicked: bool,
    outbox: Vec<Outbound>,
}

impl HostState {
    pub fn new(host_name: &str, deck: Box<dyn QuestionSource>, store: Box<dyn SaveStore>) -> Self {
        let mut state = Self {
            peers: PeerTable::new(),
            roster: Roster::new(),
            deck,
            store,
            self_kicked: false,
            outbox: Vec::new(),
        };
        state.peers.insert(PeerId::HOST, LinkPhase::Open);
        state.set_name(PeerId::HOST, host_name);
        state.outbox.clear();
        state
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn position(&self) -> CardPosition {
        self.deck.position()
    }

    pub fn current_question(&self) -> Question {
        self.deck.current()
    }

    /// The host's own player was kicked by a vote
    pub fn self_kicked(&self) -> bool {
        self.self_kicked
    }

    fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, to: PeerId, message: HostMessage) {
        if self.peers.get(to).is_some_and(|p| p.is_open() && !to.is_host()) {
            self.outbox.push(Outbound::Send { to, message });
        }
    }

    fn broadcast(&mut self, message: HostMessage) {
        let targets: Vec<PeerId> = self.peers.remote_open().collect();
        for to in targets {
            self.outbox.push(Outbound::Send {
                to,
                message: message.clone(),
            });
        }
    }

    fn question_message(&self) -> HostMessage {
        HostMessage::Question {
            position: self.deck.position(),
            question: self.deck.current(),
        }
    }

    // Link lifecycle

    /// A slot started or advanced negotiation
    pub fn peer_negotiating(&mut self, id: PeerId, step: String) {
        let peer = self.peers.insert(id, LinkPhase::Negotiating(step.clone()));
        if !peer.is_open() {
            peer.phase = LinkPhase::Negotiating(step);
        }
    }

    /// Channel is open: welcome the peer, then refresh everybody
    pub fn peer_opened(&mut self, id: PeerId) -> Vec<Outbound> {
        self.peers.insert(id, LinkPhase::Open).phase = LinkPhase::Open;
        tracing::info!("{} connected", id);
        self.send(id, HostMessage::Version(PROTOCOL_VERSION));
        let question = self.question_message();
        self.send(id, question);
        self.update();
        self.drain()
    }

    /// Negotiation failed, the link dropped or the client left
    pub fn peer_failed(&mut self, id: PeerId, reason: String) -> Vec<Outbound> {
        if id.is_host() {
            return Vec::new();
        }
        let Some(peer) = self.peers.get_mut(id) else {
            return Vec::new();
        };
        if matches!(peer.phase, LinkPhase::Failed(_)) {
            return Vec::new();
        }
        tracing::warn!("{}: {}", peer.label(), reason);
        peer.phase = LinkPhase::Failed(reason.clone());
        self.reclaim_names();
        self.update();
        self.outbox.push(Outbound::Drop { peer: id, reason });
        self.drain()
    }

    /// Forget a failed peer once its grace period ran out
    pub fn remove_peer(&mut self, id: PeerId) -> bool {
        if id.is_host() {
            return false;
        }
        self.peers.remove(id).is_some()
    }

    /// Tell everybody the session is over
    pub fn shutdown(&mut self) -> Vec<Outbound> {
        self.broadcast(HostMessage::Shutdown);
        let remote: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|p| !p.id.is_host())
            .map(|p| p.id)
            .collect();
        for id in remote {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.phase = LinkPhase::Failed("host stopped".to_string());
            }
            self.outbox.push(Outbound::Drop {
                peer: id,
                reason: "host stopped".to_string(),
            });
        }
        self.drain()
    }

    // Messages and intents

    pub fn handle_message(&mut self, id: PeerId, message: ClientMessage) -> Vec<Outbound> {
        tracing::debug!("{} -> {:?}", id, message);
        if !self.peers.get(id).is_some_and(|p| p.is_open()) {
            tracing::debug!("Dropping message from {} which is not connected", id);
            return Vec::new();
        }
        match message {
            ClientMessage::SetName(name) => self.set_name(id, &name),
            ClientMessage::Jump(index) => self.jump(index),
            ClientMessage::Respond(response) => self.respond(id, response),
            ClientMessage::Leave => {
                let who = self
                    .peers
                    .get(id)
                    .map(|p| p.label())
                    .unwrap_or_else(|| id.to_string());
                return self.peer_failed(id, format!("{} exited", who));
            }
            ClientMessage::Log(text) => tracing::info!("Client log request from {}: {}", id, text),
            ClientMessage::Ignored { raw, reason } => {
                tracing::warn!("Unhandled message from {}: {:?} ({})", id, raw, reason)
            }
        }
        self.drain()
    }

    /// Host's own actions go through the same paths as remote ones
    pub fn local_intent(&mut self, intent: Intent) -> Vec<Outbound> {
        match intent {
            Intent::SetName(name) => self.set_name(PeerId::HOST, &name),
            Intent::Answer(answer) => {
                if let Some(current) = self.own_response() {
                    self.respond(PeerId::HOST, current.clicked_answer(answer));
                }
            }
            Intent::Toggle(marker) => {
                if let Some(current) = self.own_response() {
                    self.respond(PeerId::HOST, current.toggled(marker));
                }
            }
            Intent::Next => {
                if self.deck.next() {
                    self.question_changed();
                    self.update();
                }
            }
            Intent::Prev => {
                if self.deck.prev() {
                    self.question_changed();
                    self.update();
                }
            }
            Intent::Jump(index) => self.jump(index),
        }
        self.drain()
    }

    fn own_response(&self) -> Option<ResponseBits> {
        let name = &self.peers.get(PeerId::HOST)?.name;
        self.roster.get(name).map(|r| r.response)
    }

    fn set_name(&mut self, id: PeerId, name: &str) {
        let requested = if name.is_empty() {
            ""
        } else if !validate_name(name) {
            tracing::warn!("{} sent invalid name {:?}, treating as spectator", id, name);
            ""
        } else {
            name
        };
        let accepted = if !requested.is_empty() && self.peers.name_taken(requested, id) {
            tracing::warn!("{} picked {:?} which is already in use, treating as spectator", id, name);
            ""
        } else {
            requested
        };
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        peer.requested = requested.to_string();
        peer.name = accepted.to_string();
        if id.is_host() {
            self.self_kicked = false;
        }
        self.update();
    }

    /// Hand names freed by a departed peer to spectators that asked for them
    fn reclaim_names(&mut self) {
        for (id, name) in self.peers.reclaimable() {
            if let Some(peer) = self.peers.get_mut(id) {
                tracing::info!("{} takes over the name {:?}", id, name);
                peer.name = name;
            }
        }
    }

    /// `index` is 1-based; one past the last card selects the end card
    fn jump(&mut self, index: usize) {
        let total = self.deck.position().total;
        if index == 0 || index > total + 1 {
            tracing::warn!("Ignoring jump to card {} of {}", index, total);
            return;
        }
        if self.deck.jump(index - 1) {
            self.question_changed();
            self.update();
        }
    }

    fn respond(&mut self, id: PeerId, response: ResponseBits) {
        let name = match self.peers.get(id) {
            Some(peer) if !peer.name.is_empty() => peer.name.clone(),
            _ => {
                tracing::debug!("Ignoring response from nameless {}", id);
                return;
            }
        };
        if self.roster.respond(&name, response) {
            self.update();
        }
    }

    // Canonical state

    fn sync_roster(&mut self) {
        self.roster.sync(self.peers.claimed_names());
    }

    /// New card: clear responses, announce it, persist, drop departed players
    fn question_changed(&mut self) {
        self.roster.reset_responses();
        let question = self.question_message();
        self.broadcast(question);
        let save = self.deck.savepoint();
        if let Err(e) = self.store.save(&save) {
            tracing::warn!("Failed to persist savegame: {}", e);
        }
        self.roster.remove_inactive();
        tracing::info!("Now on {}", self.deck.position());
    }

    /// Kick named players who neither answered nor hold the hot seat
    fn kick_unresponsive(&mut self) {
        let targets: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|p| !p.name.is_empty())
            .filter(|p| {
                self.roster
                    .get(&p.name)
                    .is_some_and(|r| !r.response.is_answered() && !r.response.answerer)
            })
            .map(|p| p.id)
            .collect();

        for id in targets {
            if let Some(peer) = self.peers.get_mut(id) {
                tracing::info!("Kicking {} for inactivity", peer.label());
                peer.name.clear();
                peer.requested.clear();
            }
            if id.is_host() {
                self.self_kicked = true;
            } else {
                self.send(id, HostMessage::Kick);
            }
        }
    }

    /// Recompute after any mutation: roster, quorums, then one broadcast
    fn update(&mut self) {
        self.sync_roster();

        if self.roster.count(Marker::Next) >= QUORUM {
            if self.deck.next() {
                self.question_changed();
            } else {
                self.roster.clear_marker(Marker::Next);
            }
        }

        if self.roster.count(Marker::Kick) >= QUORUM {
            self.kick_unresponsive();
            self.roster.clear_marker(Marker::Kick);
            self.sync_roster();
        }

        let snapshot = self.roster.snapshot();
        self.broadcast(HostMessage::Roster(snapshot));
    }

    // Views for the host's own screen

    pub fn host_name(&self) -> &str {
        self.peers
            .get(PeerId::HOST)
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }

    pub fn view(&self) -> GameView {
        GameView::build(
            self.deck.position(),
            self.deck.current(),
            self.roster.snapshot(),
            self.host_name(),
            None,
        )
    }

    /// One-line session summary for the host screen
    pub fn status_line(&self) -> String {
        let question = self.deck.current();
        let mut parts = vec![format!("{}, category {}", self.deck.position(), question.category)];

        let remote = self.peers.iter().filter(|p| !p.id.is_host()).count();
        if remote > 0 {
            if self.host_name().is_empty() {
                parts.push("you are spectating".to_string());
            } else {
                parts.push(format!("your username is {}", self.host_name()));
            }
        }

        let spectators = self
            .peers
            .iter()
            .filter(|p| !p.id.is_host() && p.is_open() && p.name.is_empty())
            .count();
        let pending = self
            .peers
            .iter()
            .filter(|p| matches!(p.phase, LinkPhase::Negotiating(_)))
            .count();
        let players = self.roster.active_count();
        if spectators > 0 {
            parts.push(format!("{} spectators", spectators));
        }
        if players > 0 {
            parts.push(format!("{} players", players));
        }
        if pending > 0 {
            parts.push(format!("{} pending", pending));
        }
        parts.join(", ")
    }

    /// Diagnostics for every link that is not simply open
    pub fn network_status(&self) -> String {
        self.peers
            .iter()
            .filter_map(|p| match &p.phase {
                LinkPhase::Open => None,
                LinkPhase::Negotiating(step) => Some(format!("{}: {}", p.id, step)),
                LinkPhase::Failed(reason) => Some(format!("{}: error: {}", p.id, reason)),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
