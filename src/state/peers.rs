use crate::types::PeerId;
use std::collections::BTreeMap;

/// Where a peer's link currently stands, from the host's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPhase {
    /// Still negotiating; carries the current step for diagnostics
    Negotiating(String),
    Open,
    /// Kept around briefly so the failure stays visible
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    /// Empty means spectator
    pub name: String,
    /// Valid name the peer asked for, kept while a collision holds it back
    pub requested: String,
    pub phase: LinkPhase,
}

impl Peer {
    pub fn is_open(&self) -> bool {
        self.phase == LinkPhase::Open
    }

    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("{} (spectator)", self.id)
        } else {
            format!("{} ({})", self.id, self.name)
        }
    }
}

/// Arena of peers keyed by id. The host's own seat lives at `PeerId::HOST`.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: PeerId, phase: LinkPhase) -> &mut Peer {
        self.peers.entry(id).or_insert(Peer {
            id,
            name: String::new(),
            requested: String::new(),
            phase,
        })
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Open remote peers, i.e. everyone a broadcast should reach
    pub fn remote_open(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers
            .values()
            .filter(|p| !p.id.is_host() && p.is_open())
            .map(|p| p.id)
    }

    /// Names claimed by open peers, the live set the roster syncs against
    pub fn claimed_names(&self) -> impl Iterator<Item = &str> {
        self.peers
            .values()
            .filter(|p| p.is_open() && !p.name.is_empty())
            .map(|p| p.name.as_str())
    }

    /// Whether an open peer other than `except` already uses `name`
    pub fn name_taken(&self, name: &str, except: PeerId) -> bool {
        self.peers
            .values()
            .any(|p| p.id != except && p.is_open() && p.name == name)
    }

    /// Open peers held back as spectators whose requested name is free now.
    /// Newest peers come first, so a reconnect wins over older leftovers.
    pub fn reclaimable(&self) -> Vec<(PeerId, String)> {
        let mut granted: Vec<(PeerId, String)> = Vec::new();
        for p in self.peers.values().rev() {
            if p.is_open()
                && p.name.is_empty()
                && !p.requested.is_empty()
                && !self.name_taken(&p.requested, p.id)
                && !granted.iter().any(|(_, name)| *name == p.requested)
            {
                granted.push((p.id, p.requested.clone()));
            }
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimed_names_skip_spectators_and_failed() {
        let mut table = PeerTable::new();
        table.insert(PeerId::HOST, LinkPhase::Open).name = "host".to_string();
        table.insert(PeerId(1), LinkPhase::Open).name = "alice".to_string();
        table.insert(PeerId(2), LinkPhase::Open);
        table
            .insert(PeerId(3), LinkPhase::Failed("lost".to_string()))
            .name = "bob".to_string();

        let names: Vec<&str> = table.claimed_names().collect();
        assert_eq!(names, vec!["host", "alice"]);
        assert_eq!(table.remote_open().collect::<Vec<_>>(), vec![PeerId(1), PeerId(2)]);
    }

    #[test]
    fn test_name_taken_ignores_self_and_dead_peers() {
        let mut table = PeerTable::new();
        table.insert(PeerId(1), LinkPhase::Open).name = "alice".to_string();
        table
            .insert(PeerId(2), LinkPhase::Failed("lost".to_string()))
            .name = "bob".to_string();

        assert!(table.name_taken("alice", PeerId(5)));
        assert!(!table.name_taken("alice", PeerId(1)));
        assert!(!table.name_taken("bob", PeerId(5)));
    }

    #[test]
    fn test_reclaimable_prefers_newest_peer() {
        let mut table = PeerTable::new();
        table.insert(PeerId(1), LinkPhase::Failed("lost".to_string())).name = "alice".to_string();
        table.insert(PeerId(2), LinkPhase::Open).requested = "alice".to_string();
        table.insert(PeerId(3), LinkPhase::Open).requested = "alice".to_string();
        table.insert(PeerId(4), LinkPhase::Open).name = "bob".to_string();
        table.insert(PeerId(5), LinkPhase::Open).requested = "bob".to_string();

        assert_eq!(table.reclaimable(), vec![(PeerId(3), "alice".to_string())]);
    }
}
