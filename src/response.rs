//! Per-player response state and its wire bitmask
//!
//! The wire carries a small integer per player. Bits 0-2 hold the selected
//! answer (1..=7, 0 = unanswered), the upper bits are role and vote markers.
//! Everything outside this module works with the named fields.

const ANSWER_MASK: u8 = 0b0000_0111;
const ANSWERER: u8 = 0b0000_1000;
const NEXT_VOTE: u8 = 0b0001_0000;
const REVEAL_VOTE: u8 = 0b0010_0000;
const KICK_VOTE: u8 = 0b0100_0000;

/// Largest answer id that fits in the answer bits
pub const MAX_ANSWER: u8 = ANSWER_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Hot-seat role: the answerer of a plain question or the receiver of a dare
    Answerer,
    /// Vote to advance to the next question
    Next,
    /// Vote to reveal before everybody answered
    Reveal,
    /// Vote to kick unresponsive players
    Kick,
}

impl Marker {
    fn bit(self) -> u8 {
        match self {
            Marker::Answerer => ANSWERER,
            Marker::Next => NEXT_VOTE,
            Marker::Reveal => REVEAL_VOTE,
            Marker::Kick => KICK_VOTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseBits {
    pub answer: Option<u8>,
    pub answerer: bool,
    pub next: bool,
    pub reveal: bool,
    pub kick: bool,
}

impl ResponseBits {
    pub const EMPTY: ResponseBits = ResponseBits {
        answer: None,
        answerer: false,
        next: false,
        reveal: false,
        kick: false,
    };

    /// Decode a wire value. Bits above the kick marker are ignored.
    pub fn decode(raw: u32) -> Self {
        let raw = (raw & 0x7f) as u8;
        let answer = raw & ANSWER_MASK;
        Self {
            answer: (answer != 0).then_some(answer),
            answerer: raw & ANSWERER != 0,
            next: raw & NEXT_VOTE != 0,
            reveal: raw & REVEAL_VOTE != 0,
            kick: raw & KICK_VOTE != 0,
        }
    }

    pub fn encode(self) -> u32 {
        let mut raw = self.answer.unwrap_or(0) & ANSWER_MASK;
        for marker in [Marker::Answerer, Marker::Next, Marker::Reveal, Marker::Kick] {
            if self.has(marker) {
                raw |= marker.bit();
            }
        }
        raw as u32
    }

    /// Parse the decimal wire form; garbage yields `None` (a no-op for callers)
    pub fn parse(param: &str) -> Option<Self> {
        param.trim().parse::<u32>().ok().map(Self::decode)
    }

    pub fn has(self, marker: Marker) -> bool {
        match marker {
            Marker::Answerer => self.answerer,
            Marker::Next => self.next,
            Marker::Reveal => self.reveal,
            Marker::Kick => self.kick,
        }
    }

    pub fn set(&mut self, marker: Marker, on: bool) {
        match marker {
            Marker::Answerer => self.answerer = on,
            Marker::Next => self.next = on,
            Marker::Reveal => self.reveal = on,
            Marker::Kick => self.kick = on,
        }
    }

    pub fn toggled(mut self, marker: Marker) -> Self {
        self.set(marker, !self.has(marker));
        self
    }

    pub fn is_answered(self) -> bool {
        self.answer.is_some()
    }

    /// Answer click: picking while already answered clears the answer,
    /// otherwise the picked answer is selected.
    pub fn clicked_answer(mut self, answer: u8) -> Self {
        if self.answer.is_some() {
            self.answer = None;
        } else if (1..=MAX_ANSWER).contains(&answer) {
            self.answer = Some(answer);
        }
        self
    }
}

impl std::fmt::Display for ResponseBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
