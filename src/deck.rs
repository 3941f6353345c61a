//! Question cursor
//!
//! The host consumes questions through [`QuestionSource`]. [`Deck`] is the
//! stock implementation: a seeded shuffle of the full question list, filtered
//! by the enabled categories, with the "out of questions" card after the end.

use crate::protocol::FIELD_SEPARATOR;
use crate::types::{CardPosition, Question, Savegame};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("question file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("question file format: {0}")]
    Json(#[from] serde_json::Error),

    #[error("question file has no questions")]
    Empty,

    #[error("question {0:?} contains the reserved '@' separator")]
    Separator(String),
}

pub trait QuestionSource: Send {
    fn current(&self) -> Question;

    fn position(&self) -> CardPosition;

    /// Move to a 0-based filtered index; `total` selects the end card.
    /// Returns false when out of range or already there.
    fn jump(&mut self, index: usize) -> bool;

    /// What to persist so the game can resume here
    fn savepoint(&self) -> Savegame;

    fn next(&mut self) -> bool {
        let pos = self.position();
        pos.index < pos.total && self.jump(pos.index + 1)
    }

    fn prev(&mut self) -> bool {
        let pos = self.position();
        pos.index > 0 && self.jump(pos.index - 1)
    }
}

#[derive(Debug, Clone)]
pub struct Deck {
    questions: Vec<Question>,
    enabled: Option<HashSet<String>>,
    seed: u64,
    /// Index into `questions`; `questions.len()` once exhausted
    question_index: usize,
    filtered_index: usize,
    filtered_total: usize,
}

impl Deck {
    /// `categories == None` enables everything. A zero seed keeps file order.
    pub fn new(mut questions: Vec<Question>, categories: Option<Vec<String>>, seed: u64) -> Self {
        if seed != 0 {
            questions.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        let enabled = categories.map(|c| c.into_iter().collect::<HashSet<_>>());
        let mut deck = Self {
            questions,
            enabled,
            seed,
            question_index: 0,
            filtered_index: 0,
            filtered_total: 0,
        };
        deck.filtered_total = deck.questions.iter().filter(|q| deck.is_enabled(q)).count();
        deck.question_index = deck.first_enabled_from(0);
        deck
    }

    /// Rebuild a deck at a saved spot. The saved seed wins over `seed`.
    pub fn resume(questions: Vec<Question>, categories: Option<Vec<String>>, save: Savegame) -> Self {
        let mut deck = Self::new(questions, categories, save.seed);
        let start = save.question_index.min(deck.questions.len());
        deck.question_index = deck.first_enabled_from(start);
        deck.filtered_index = deck.questions[..deck.question_index]
            .iter()
            .filter(|q| deck.is_enabled(q))
            .count();
        deck
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn is_enabled(&self, q: &Question) -> bool {
        self.enabled
            .as_ref()
            .map(|set| set.contains(&q.category))
            .unwrap_or(true)
    }

    fn first_enabled_from(&self, start: usize) -> usize {
        (start..self.questions.len())
            .find(|&i| self.is_enabled(&self.questions[i]))
            .unwrap_or(self.questions.len())
    }
}

impl QuestionSource for Deck {
    fn current(&self) -> Question {
        self.questions
            .get(self.question_index)
            .cloned()
            .unwrap_or_else(Question::out_of_questions)
    }

    fn position(&self) -> CardPosition {
        CardPosition {
            index: self.filtered_index,
            total: self.filtered_total,
        }
    }

    fn jump(&mut self, index: usize) -> bool {
        if index > self.filtered_total || index == self.filtered_index {
            return false;
        }
        self.question_index = self
            .questions
            .iter()
            .enumerate()
            .filter(|(_, q)| self.is_enabled(q))
            .nth(index)
            .map(|(i, _)| i)
            .unwrap_or(self.questions.len());
        self.filtered_index = index;
        true
    }

    fn savepoint(&self) -> Savegame {
        Savegame {
            question_index: self.question_index,
            seed: self.seed,
        }
    }
}

/// Load a JSON array of questions. Text must stay free of the wire field
/// separator, otherwise `q` broadcasts would split in the wrong places.
pub fn load_questions(path: &Path) -> Result<Vec<Question>, DeckError> {
    let json = std::fs::read_to_string(path)?;
    let questions: Vec<Question> = serde_json::from_str(&json)?;
    if questions.is_empty() {
        return Err(DeckError::Empty);
    }
    for q in &questions {
        let mut fields = std::iter::once(&q.category)
            .chain(std::iter::once(&q.prompt))
            .chain(q.answers.iter());
        if fields.any(|f| f.contains(FIELD_SEPARATOR)) {
            return Err(DeckError::Separator(q.prompt.clone()));
        }
    }
    Ok(questions)
}

/// Small built-in deck used when no question file is configured
pub fn sample_questions() -> Vec<Question> {
    vec![
        Question::new("softball", "Cats or dogs?", &["cats", "dogs"]),
        Question::new(
            "softball",
            "Ideal weekend?",
            &["sleep in", "outdoors", "friends", "projects"],
        ),
        Question::new("softball", "Morning person?", &["yes", "no", "depends"]),
        Question::new("activities", "vote: go bowling together?", &[]),
        Question::new("activities", "vote: cook dinner as a group?", &[]),
        Question::new("activities", "dare: sing the chorus of your favourite song", &[]),
        Question::new("spicy", "Ever lied to get out of a party?", &["yes", "no"]),
        Question::new("spicy", "dare: show the last photo on your phone", &[]),
    ]
}
