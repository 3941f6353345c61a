//! Reveal and outcome rules
//!
//! Pure functions over a roster snapshot (active players only). Both the
//! host and the client replicas use them, so every screen derives the same
//! outcome from the same broadcast.

use crate::protocol::RosterEntry;
use crate::response::ResponseBits;
use crate::types::{CardPosition, Question, QuestionKind};

/// Markers needed before a vote takes effect, regardless of roster size
pub const QUORUM: usize = 2;

/// Round-level verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reveal {
    /// Plain question or dare without an answerer/receiver yet
    NeedsVolunteer,
    Pending,
    Answered { answer: u8, unanimous: bool },
    Vote { go: bool },
    Dare { volunteer: bool },
}

impl Reveal {
    pub fn is_revealed(self) -> bool {
        !matches!(self, Reveal::NeedsVolunteer | Reveal::Pending)
    }
}

/// Group vote: min >= 3, or min >= 2 with at least one 4
pub fn vote_goes(answers: &[u8]) -> bool {
    let (Some(&min), Some(&max)) = (answers.iter().min(), answers.iter().max()) else {
        return false;
    };
    min >= 3 || (min >= 2 && max == 4)
}

/// Dare: somebody answered 2 or more. With exactly two respondents both have
/// to be at least lukewarm and one of them keen.
pub fn dare_has_volunteer(answers: &[u8]) -> bool {
    if answers.len() == 2 {
        let (min, max) = (answers[0].min(answers[1]), answers[0].max(answers[1]));
        return min >= 2 && max >= 3;
    }
    answers.iter().any(|&a| a >= 2)
}

fn hot_seat(players: &[RosterEntry]) -> Option<&RosterEntry> {
    players.iter().find(|p| p.response.answerer)
}

fn reveal_votes(players: &[RosterEntry]) -> usize {
    players.iter().filter(|p| p.response.reveal).count()
}

pub fn reveal(kind: QuestionKind, players: &[RosterEntry]) -> Reveal {
    let seat = hot_seat(players);
    let forced = reveal_votes(players) >= QUORUM;

    match kind {
        QuestionKind::Plain => {
            let Some(answerer) = seat else {
                return Reveal::NeedsVolunteer;
            };
            let Some(answer) = answerer.response.answer else {
                return Reveal::Pending;
            };
            let guesses: Vec<Option<u8>> = players
                .iter()
                .filter(|p| !p.response.answerer)
                .map(|p| p.response.answer)
                .collect();
            if guesses.iter().any(Option::is_none) && !forced {
                return Reveal::Pending;
            }
            Reveal::Answered {
                answer,
                unanimous: guesses.iter().flatten().all(|&g| g == answer),
            }
        }
        QuestionKind::GroupVote => {
            let answers: Vec<u8> = players.iter().filter_map(|p| p.response.answer).collect();
            let waiting = answers.len() < players.len();
            if answers.is_empty() || (waiting && !forced) {
                return Reveal::Pending;
            }
            Reveal::Vote {
                go: vote_goes(&answers),
            }
        }
        QuestionKind::Dare => {
            if seat.is_none() {
                return Reveal::NeedsVolunteer;
            }
            let respondents: Vec<&RosterEntry> =
                players.iter().filter(|p| !p.response.answerer).collect();
            let answers: Vec<u8> = respondents.iter().filter_map(|p| p.response.answer).collect();
            let waiting = answers.len() < respondents.len();
            if waiting && (answers.is_empty() || !forced) {
                return Reveal::Pending;
            }
            Reveal::Dare {
                volunteer: dare_has_volunteer(&answers),
            }
        }
    }
}

/// What a single participant should be doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Fewer than two players, nothing to play yet
    Lobby,
    QuestionVolunteer,
    DareVolunteer,
    Respond,
    Guess,
    Wait,
    Congrats,
    Interrogate,
    Correct,
    Wrong,
    Plan,
    Skip,
    Pick,
    Watch,
    /// Own last click not yet echoed by the host
    Syncing,
}

impl PlayerStatus {
    pub fn emoji(self) -> &'static str {
        match self {
            PlayerStatus::Lobby => "🛋",
            PlayerStatus::QuestionVolunteer | PlayerStatus::DareVolunteer => "👋",
            PlayerStatus::Respond => "🎲",
            PlayerStatus::Guess => "🤔",
            PlayerStatus::Wait => "⌛",
            PlayerStatus::Congrats => "👍",
            PlayerStatus::Interrogate => "😐",
            PlayerStatus::Correct => "✅",
            PlayerStatus::Wrong => "❌",
            PlayerStatus::Plan => "📅",
            PlayerStatus::Skip => "🚫",
            PlayerStatus::Pick => "👈",
            PlayerStatus::Watch => "📺",
            PlayerStatus::Syncing => "…",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            PlayerStatus::Lobby => "lobby",
            PlayerStatus::QuestionVolunteer | PlayerStatus::DareVolunteer => "volunteer",
            PlayerStatus::Respond => "respond",
            PlayerStatus::Guess => "guess",
            PlayerStatus::Wait => "wait",
            PlayerStatus::Congrats => "congrats",
            PlayerStatus::Interrogate => "interrogate",
            PlayerStatus::Correct => "correct",
            PlayerStatus::Wrong => "wrong",
            PlayerStatus::Plan => "plan",
            PlayerStatus::Skip => "skip",
            PlayerStatus::Pick => "pick",
            PlayerStatus::Watch => "watch",
            PlayerStatus::Syncing => "network",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PlayerStatus::Lobby => "Waiting for at least two players.",
            PlayerStatus::QuestionVolunteer => "Someone has to volunteer to answer the question.",
            PlayerStatus::DareVolunteer => "Someone has to volunteer to receive the dare.",
            PlayerStatus::Respond => "Pick an answer.",
            PlayerStatus::Guess => "Guess what the answerer will answer.",
            PlayerStatus::Wait => "Wait until the other players make their move.",
            PlayerStatus::Congrats => "Everyone guessed your answer, congratulate them.",
            PlayerStatus::Interrogate => "Some guesses were wrong, find out why.",
            PlayerStatus::Correct => "Your guess is correct.",
            PlayerStatus::Wrong => "Your guess is wrong.",
            PlayerStatus::Plan => "The group likes the idea, make a plan for it.",
            PlayerStatus::Skip => "Not enough enthusiasm, skip it.",
            PlayerStatus::Pick => "Pick one of the volunteers.",
            PlayerStatus::Watch => "Wait for the receiver to pick a volunteer and enjoy the show.",
            PlayerStatus::Syncing => "Waiting for the host to confirm your last move.",
        }
    }
}

/// Status of `me` (empty or absent from the roster means spectator).
/// `sent` is the last response this participant sent; a differing echo
/// shows as `Syncing`.
pub fn player_status(
    kind: QuestionKind,
    players: &[RosterEntry],
    me: &str,
    sent: Option<ResponseBits>,
) -> PlayerStatus {
    if players.len() < QUORUM {
        return PlayerStatus::Lobby;
    }
    let mine = players.iter().find(|p| !me.is_empty() && p.name == me);
    if let (Some(entry), Some(sent)) = (mine, sent) {
        if entry.response != sent {
            return PlayerStatus::Syncing;
        }
    }
    let is_player = mine.is_some();
    let is_seat = mine.map(|p| p.response.answerer).unwrap_or(false);
    let my_answer = mine.and_then(|p| p.response.answer);

    match (kind, reveal(kind, players)) {
        (QuestionKind::Plain, Reveal::NeedsVolunteer) => PlayerStatus::QuestionVolunteer,
        (QuestionKind::Dare, Reveal::NeedsVolunteer) => PlayerStatus::DareVolunteer,
        (QuestionKind::Plain, _) if is_player && my_answer.is_none() && is_seat => {
            PlayerStatus::Respond
        }
        (QuestionKind::Plain, _) if is_player && my_answer.is_none() => PlayerStatus::Guess,
        (QuestionKind::Dare, _) if is_player && !is_seat && my_answer.is_none() => {
            PlayerStatus::Respond
        }
        (QuestionKind::GroupVote, _) if is_player && my_answer.is_none() => PlayerStatus::Respond,
        (_, Reveal::NeedsVolunteer | Reveal::Pending) => PlayerStatus::Wait,
        (_, Reveal::Answered { unanimous, .. }) if is_seat || !is_player => {
            if unanimous {
                PlayerStatus::Congrats
            } else {
                PlayerStatus::Interrogate
            }
        }
        (_, Reveal::Answered { answer, .. }) => {
            if my_answer == Some(answer) {
                PlayerStatus::Correct
            } else {
                PlayerStatus::Wrong
            }
        }
        (_, Reveal::Vote { go: true }) => PlayerStatus::Plan,
        (_, Reveal::Vote { go: false }) => PlayerStatus::Skip,
        (_, Reveal::Dare { volunteer: true }) if is_seat => PlayerStatus::Pick,
        (_, Reveal::Dare { volunteer: true }) => PlayerStatus::Watch,
        (_, Reveal::Dare { volunteer: false }) => PlayerStatus::Skip,
    }
}

/// Everything a renderer needs for one screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameView {
    pub position: CardPosition,
    pub question: Question,
    /// Active players, sorted by name
    pub roster: Vec<RosterEntry>,
    pub me: String,
    pub status: PlayerStatus,
    pub reveal: Reveal,
}

impl GameView {
    pub fn build(
        position: CardPosition,
        question: Question,
        roster: Vec<RosterEntry>,
        me: &str,
        sent: Option<ResponseBits>,
    ) -> Self {
        let kind = question.kind();
        let reveal = reveal(kind, &roster);
        let status = player_status(kind, &roster, me, sent);
        Self {
            position,
            question,
            roster,
            me: me.to_string(),
            status,
            reveal,
        }
    }

    pub fn is_spectator(&self) -> bool {
        !self.roster.iter().any(|p| !self.me.is_empty() && p.name == self.me)
    }

    /// The player holding the answerer/receiver marker
    pub fn hot_seat(&self) -> Option<&str> {
        hot_seat(&self.roster).map(|p| p.name.as_str())
    }

    /// Own response as last echoed by the host
    pub fn my_response(&self) -> Option<ResponseBits> {
        self.roster
            .iter()
            .find(|p| !self.me.is_empty() && p.name == self.me)
            .map(|p| p.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, raw: u32) -> RosterEntry {
        RosterEntry {
            name: name.to_string(),
            response: ResponseBits::decode(raw),
        }
    }

    fn answers(values: &[u32]) -> Vec<RosterEntry> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| entry(&format!("p{}", i), *v))
            .collect()
    }

    #[test]
    fn test_group_vote_outcomes() {
        assert!(vote_goes(&[3, 3, 2, 4]));
        assert!(!vote_goes(&[3, 3, 2, 2]));
        assert!(vote_goes(&[3, 3, 3]));
        assert!(!vote_goes(&[1, 4, 4]));
        assert!(!vote_goes(&[]));

        assert_eq!(
            reveal(QuestionKind::GroupVote, &answers(&[3, 3, 2, 4])),
            Reveal::Vote { go: true }
        );
        assert_eq!(
            reveal(QuestionKind::GroupVote, &answers(&[3, 3, 2, 2])),
            Reveal::Vote { go: false }
        );
    }

    #[test]
    fn test_two_respondent_dare() {
        assert!(dare_has_volunteer(&[2, 3]));
        assert!(!dare_has_volunteer(&[1, 4]));
        assert!(!dare_has_volunteer(&[2, 2]));
        assert!(dare_has_volunteer(&[1, 1, 2]));
        assert!(!dare_has_volunteer(&[1]));

        // Receiver holds the marker and no answer; the other two responded
        let players = vec![entry("alice", 8), entry("bob", 2), entry("carol", 3)];
        assert_eq!(
            reveal(QuestionKind::Dare, &players),
            Reveal::Dare { volunteer: true }
        );
        let players = vec![entry("alice", 8), entry("bob", 1), entry("carol", 4)];
        assert_eq!(
            reveal(QuestionKind::Dare, &players),
            Reveal::Dare { volunteer: false }
        );
    }

    #[test]
    fn test_plain_needs_answerer_then_waits() {
        let players = answers(&[1, 2]);
        assert_eq!(reveal(QuestionKind::Plain, &players), Reveal::NeedsVolunteer);

        // Answerer has not answered yet
        let players = vec![entry("alice", 8), entry("bob", 2)];
        assert_eq!(reveal(QuestionKind::Plain, &players), Reveal::Pending);

        // A guesser is still thinking
        let players = vec![entry("alice", 8 | 2), entry("bob", 2), entry("carol", 0)];
        assert_eq!(reveal(QuestionKind::Plain, &players), Reveal::Pending);
    }

    #[test]
    fn test_plain_reveal() {
        let players = vec![entry("alice", 8 | 2), entry("bob", 2), entry("carol", 2)];
        assert_eq!(
            reveal(QuestionKind::Plain, &players),
            Reveal::Answered {
                answer: 2,
                unanimous: true
            }
        );
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "alice", None),
            PlayerStatus::Congrats
        );

        let players = vec![entry("alice", 8 | 2), entry("bob", 2), entry("carol", 1)];
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "alice", None),
            PlayerStatus::Interrogate
        );
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "bob", None),
            PlayerStatus::Correct
        );
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "carol", None),
            PlayerStatus::Wrong
        );
        // Spectators see the answerer's view
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "", None),
            PlayerStatus::Interrogate
        );
    }

    #[test]
    fn test_reveal_quorum_forces_reveal() {
        // carol never answers, two reveal votes push it through
        let players = vec![entry("alice", 8 | 2 | 32), entry("bob", 2 | 32), entry("carol", 0)];
        assert_eq!(
            reveal(QuestionKind::Plain, &players),
            Reveal::Answered {
                answer: 2,
                unanimous: true
            }
        );

        // One vote is not enough
        let players = vec![entry("alice", 8 | 2 | 32), entry("bob", 2), entry("carol", 0)];
        assert_eq!(reveal(QuestionKind::Plain, &players), Reveal::Pending);

        // A vote quorum still needs at least one answer
        let players = vec![entry("alice", 32), entry("bob", 32)];
        assert_eq!(reveal(QuestionKind::GroupVote, &players), Reveal::Pending);
    }

    #[test]
    fn test_status_before_reveal() {
        let players = vec![entry("alice", 8), entry("bob", 0)];
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "alice", None),
            PlayerStatus::Respond
        );
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "bob", None),
            PlayerStatus::Guess
        );

        let players = vec![entry("alice", 0), entry("bob", 0)];
        assert_eq!(
            player_status(QuestionKind::Dare, &players, "bob", None),
            PlayerStatus::DareVolunteer
        );
        assert_eq!(
            player_status(QuestionKind::GroupVote, &players, "bob", None),
            PlayerStatus::Respond
        );
        assert_eq!(
            player_status(QuestionKind::GroupVote, &players[..1], "alice", None),
            PlayerStatus::Lobby
        );
    }

    #[test]
    fn test_dare_receiver_picks() {
        let players = vec![entry("alice", 8), entry("bob", 3), entry("carol", 1), entry("dave", 2)];
        assert_eq!(
            player_status(QuestionKind::Dare, &players, "alice", None),
            PlayerStatus::Pick
        );
        assert_eq!(
            player_status(QuestionKind::Dare, &players, "bob", None),
            PlayerStatus::Watch
        );
    }

    #[test]
    fn test_unconfirmed_click_is_syncing() {
        let players = vec![entry("alice", 8), entry("bob", 0)];
        let sent = ResponseBits::decode(3);
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "bob", Some(sent)),
            PlayerStatus::Syncing
        );
        assert_eq!(
            player_status(QuestionKind::Plain, &players, "bob", Some(ResponseBits::EMPTY)),
            PlayerStatus::Guess
        );
    }

    #[test]
    fn test_view_helpers() {
        let view = GameView::build(
            CardPosition { index: 0, total: 1 },
            Question::new("softball", "Cats or dogs?", &["cats", "dogs"]),
            vec![entry("alice", 8), entry("bob", 0)],
            "bob",
            None,
        );
        assert_eq!(view.hot_seat(), Some("alice"));
        assert!(!view.is_spectator());
        assert_eq!(view.status, PlayerStatus::Guess);
        assert_eq!(view.my_response(), Some(ResponseBits::EMPTY));
    }
}
