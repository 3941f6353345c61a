use crate::response::Marker;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type SlotId = u64;

/// Index into the host's peer arena. Slot ids double as peer ids; the host's
/// own seat is `PeerId::HOST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    pub const HOST: PeerId = PeerId(0);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl From<SlotId> for PeerId {
    fn from(slot: SlotId) -> Self {
        PeerId(slot)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            write!(f, "client {}", self.0)
        }
    }
}

/// Protocol/content version announced with the `v` command.
pub const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// Multiple choice with an answerer and guessers
    Plain,
    /// "vote: ..." prompts, everybody answers on the 1-4 scale
    GroupVote,
    /// "dare: ..." prompts, one receiver and willing volunteers
    Dare,
}

impl QuestionKind {
    pub const VOTE_PREFIX: &'static str = "vote: ";
    pub const DARE_PREFIX: &'static str = "dare: ";

    pub fn of(prompt: &str) -> Self {
        if prompt.starts_with(Self::VOTE_PREFIX) {
            QuestionKind::GroupVote
        } else if prompt.starts_with(Self::DARE_PREFIX) {
            QuestionKind::Dare
        } else {
            QuestionKind::Plain
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub category: String,
    pub prompt: String,
    #[serde(default)]
    pub answers: Vec<String>,
}

impl Question {
    pub fn new(category: impl Into<String>, prompt: impl Into<String>, answers: &[&str]) -> Self {
        Self {
            category: category.into(),
            prompt: prompt.into(),
            answers: answers.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn kind(&self) -> QuestionKind {
        QuestionKind::of(&self.prompt)
    }

    /// Prompt text without the kind prefix
    pub fn text(&self) -> &str {
        match self.kind() {
            QuestionKind::GroupVote => &self.prompt[QuestionKind::VOTE_PREFIX.len()..],
            QuestionKind::Dare => &self.prompt[QuestionKind::DARE_PREFIX.len()..],
            QuestionKind::Plain => &self.prompt,
        }
    }

    /// Card shown once the filtered deck is exhausted
    pub fn out_of_questions() -> Self {
        Self::new(
            "none",
            "vote: Game over because out of questions. Play again with spicier categories?",
            &[],
        )
    }
}

/// Position of the current card within the filtered deck.
/// `index` is 0-based, `index == total` means the deck is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardPosition {
    pub index: usize,
    pub total: usize,
}

impl fmt::Display for CardPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card {}/{}", self.index + 1, self.total)
    }
}

/// A local user action, before it is turned into a wire command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SetName(String),
    /// Click on answer button 1..=7
    Answer(u8),
    Toggle(Marker),
    Next,
    Prev,
    /// 1-based filtered card index
    Jump(usize),
}

/// What the host persists so a reload can resume the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savegame {
    pub question_index: usize,
    pub seed: u64,
}

/// Display names: 1-12 letters, digits, marks, dots or dashes
pub fn validate_name(name: &str) -> bool {
    let count = name.chars().count();
    (1..=12).contains(&count)
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || is_combining_mark(c))
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_kind_from_prefix() {
        assert_eq!(QuestionKind::of("vote: go bowling?"), QuestionKind::GroupVote);
        assert_eq!(QuestionKind::of("dare: sing a song"), QuestionKind::Dare);
        assert_eq!(QuestionKind::of("Favourite colour?"), QuestionKind::Plain);
        assert_eq!(QuestionKind::of("voted: nope"), QuestionKind::Plain);
    }

    #[test]
    fn test_question_text_strips_prefix() {
        let q = Question::new("activities", "vote: go bowling?", &[]);
        assert_eq!(q.text(), "go bowling?");
        let q = Question::new("softball", "Cats or dogs?", &["cats", "dogs"]);
        assert_eq!(q.text(), "Cats or dogs?");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alice"));
        assert!(validate_name("Zoë-2.0"));
        assert!(validate_name("e\u{301}mile"));
        assert!(!validate_name(""));
        assert!(!validate_name("has space"));
        assert!(!validate_name("a@b"));
        assert!(!validate_name("thirteenchars"));
    }

    #[test]
    fn test_card_position_display() {
        let pos = CardPosition { index: 0, total: 12 };
        assert_eq!(pos.to_string(), "card 1/12");
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId::HOST.to_string(), "host");
        assert_eq!(PeerId(7).to_string(), "client 7");
    }
}
