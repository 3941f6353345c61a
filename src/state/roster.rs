use crate::protocol::RosterEntry;
use crate::response::{Marker, ResponseBits};
use std::collections::BTreeMap;

/// One player record per display name. A name outlives the peer that claimed
/// it so a reconnecting client gets its response back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    pub active: bool,
    pub response: ResponseBits,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: BTreeMap<String, PlayerRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PlayerRecord> {
        self.records.get(name)
    }

    /// Mark exactly the given names active, creating records for newcomers
    pub fn sync<'a>(&mut self, claimed: impl IntoIterator<Item = &'a str>) {
        for record in self.records.values_mut() {
            record.active = false;
        }
        for name in claimed {
            self.records.entry(name.to_string()).or_default().active = true;
        }
        self.enforce_single_answerer();
    }

    /// The first active holder (by name) keeps the answerer marker
    fn enforce_single_answerer(&mut self) {
        let mut seen = false;
        for record in self.records.values_mut().filter(|r| r.active) {
            if record.response.answerer {
                if seen {
                    record.response.answerer = false;
                }
                seen = true;
            }
        }
    }

    /// Active player currently holding the answerer marker
    pub fn answerer(&self) -> Option<&str> {
        self.active()
            .find(|(_, r)| r.response.answerer)
            .map(|(name, _)| name)
    }

    /// Store a response. A second answerer claim loses its marker.
    pub fn respond(&mut self, name: &str, mut response: ResponseBits) -> bool {
        if response.answerer && self.answerer().is_some_and(|a| a != name) {
            response.answerer = false;
        }
        match self.records.get_mut(name) {
            Some(record) => {
                record.response = response;
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = (&str, &PlayerRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| r.active)
            .map(|(name, r)| (name.as_str(), r))
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn count(&self, marker: Marker) -> usize {
        self.active().filter(|(_, r)| r.response.has(marker)).count()
    }

    pub fn clear_marker(&mut self, marker: Marker) {
        for record in self.records.values_mut() {
            record.response.set(marker, false);
        }
    }

    pub fn reset_responses(&mut self) {
        for record in self.records.values_mut() {
            record.response = ResponseBits::EMPTY;
        }
    }

    pub fn remove_inactive(&mut self) {
        self.records.retain(|_, r| r.active);
    }

    /// Wire snapshot: active players, sorted by name
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.active()
            .map(|(name, r)| RosterEntry {
                name: name.to_string(),
                response: r.response,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_creates_and_deactivates() {
        let mut roster = Roster::new();
        roster.sync(["bob", "alice"]);
        assert_eq!(roster.active_count(), 2);

        roster.sync(["alice"]);
        assert_eq!(roster.active_count(), 1);
        assert!(!roster.get("bob").unwrap().active);

        roster.remove_inactive();
        assert!(roster.get("bob").is_none());
        assert!(roster.get("alice").is_some());
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let mut roster = Roster::new();
        roster.sync(["carol", "alice", "bob"]);
        let names: Vec<String> = roster.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_second_answerer_loses_marker() {
        let mut roster = Roster::new();
        roster.sync(["alice", "bob"]);
        assert!(roster.respond("bob", ResponseBits::decode(8)));
        assert!(roster.respond("alice", ResponseBits::decode(8 | 1)));

        assert_eq!(roster.answerer(), Some("bob"));
        assert_eq!(roster.get("alice").unwrap().response.encode(), 1);
    }

    #[test]
    fn test_reactivated_duplicate_answerer_cleared() {
        let mut roster = Roster::new();
        roster.sync(["alice", "bob"]);
        roster.respond("alice", ResponseBits::decode(8));
        roster.sync(["bob"]);
        roster.respond("bob", ResponseBits::decode(8));
        roster.sync(["alice", "bob"]);

        assert_eq!(roster.count(Marker::Answerer), 1);
        assert_eq!(roster.answerer(), Some("alice"));
    }

    #[test]
    fn test_record_survives_while_inactive() {
        let mut roster = Roster::new();
        roster.sync(["alice"]);
        roster.respond("alice", ResponseBits::decode(3));
        roster.sync(Vec::<&str>::new());
        roster.sync(["alice"]);
        assert_eq!(roster.get("alice").unwrap().response.encode(), 3);
    }

    #[test]
    fn test_unknown_name_ignored() {
        let mut roster = Roster::new();
        assert!(!roster.respond("ghost", ResponseBits::decode(1)));
    }
}
