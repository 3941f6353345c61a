//! Session wire codec
//!
//! Every message is a one letter command followed by a free-form text
//! parameter, e.g. `r10` or `pbob 3@carol 0`. Fields inside a parameter are
//! separated by `@`. Decoding is total: anything unrecognised becomes
//! `Ignored` so the caller can log it and move on.

use crate::response::ResponseBits;
use crate::types::{CardPosition, Question};

pub const FIELD_SEPARATOR: char = '@';

/// One player line of the roster snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub response: ResponseBits,
}

/// Host -> client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// `q`: current card
    Question {
        position: CardPosition,
        question: Question,
    },
    /// `p`: active players sorted by name
    Roster(Vec<RosterEntry>),
    /// `k`: the receiving client was kicked and must not rejoin on its own
    Kick,
    /// `v`: host protocol/content version
    Version(u32),
    /// `x`: host is shutting the session down
    Shutdown,
    /// `l`: diagnostic text
    Log(String),
    Ignored { raw: String, reason: &'static str },
}

/// Client -> host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `n`: display name, empty means spectator
    SetName(String),
    /// `j`: absolute 1-based filtered card index
    Jump(usize),
    /// `r`: full response bitmask
    Respond(ResponseBits),
    /// `x`: graceful leave
    Leave,
    /// `l`: diagnostic text
    Log(String),
    Ignored { raw: String, reason: &'static str },
}

fn split_command(raw: &str) -> Option<(char, &str)> {
    let mut chars = raw.chars();
    let cmd = chars.next()?;
    Some((cmd, chars.as_str()))
}

impl HostMessage {
    pub fn encode(&self) -> String {
        match self {
            HostMessage::Question { position, question } => {
                let mut fields = vec![
                    position.index.to_string(),
                    position.total.to_string(),
                    question.category.clone(),
                    question.prompt.clone(),
                ];
                fields.extend(question.answers.iter().cloned());
                format!("q{}", fields.join("@"))
            }
            HostMessage::Roster(entries) => {
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{} {}", e.name, e.response))
                    .collect();
                format!("p{}", lines.join("@"))
            }
            HostMessage::Kick => "k".to_string(),
            HostMessage::Version(v) => format!("v{}", v),
            HostMessage::Shutdown => "x".to_string(),
            HostMessage::Log(text) => format!("l{}", text),
            HostMessage::Ignored { raw, .. } => raw.clone(),
        }
    }

    pub fn decode(raw: &str) -> Self {
        let ignored = |reason| HostMessage::Ignored {
            raw: raw.to_string(),
            reason,
        };
        let Some((cmd, param)) = split_command(raw) else {
            return ignored("empty message");
        };

        match cmd {
            'q' => {
                let parts: Vec<&str> = param.split(FIELD_SEPARATOR).collect();
                if parts.len() < 4 {
                    return ignored("question needs index, total, category and prompt");
                }
                let (Ok(index), Ok(total)) = (parts[0].parse(), parts[1].parse()) else {
                    return ignored("question position is not numeric");
                };
                HostMessage::Question {
                    position: CardPosition { index, total },
                    question: Question {
                        category: parts[2].to_string(),
                        prompt: parts[3].to_string(),
                        answers: parts[4..].iter().map(|s| s.to_string()).collect(),
                    },
                }
            }
            'p' => {
                let entries = param
                    .split(FIELD_SEPARATOR)
                    .filter_map(|line| {
                        let (name, bits) = line.split_once(' ')?;
                        if name.is_empty() || bits.contains(' ') {
                            return None;
                        }
                        Some(RosterEntry {
                            name: name.to_string(),
                            response: ResponseBits::parse(bits).unwrap_or_default(),
                        })
                    })
                    .collect();
                HostMessage::Roster(entries)
            }
            'k' => HostMessage::Kick,
            'v' => match param.trim().parse() {
                Ok(v) => HostMessage::Version(v),
                Err(_) => ignored("version is not numeric"),
            },
            'x' => HostMessage::Shutdown,
            'l' => HostMessage::Log(param.to_string()),
            _ => ignored("unknown command"),
        }
    }
}

impl ClientMessage {
    pub fn encode(&self) -> String {
        match self {
            ClientMessage::SetName(name) => format!("n{}", name),
            ClientMessage::Jump(index) => format!("j{}", index),
            ClientMessage::Respond(bits) => format!("r{}", bits),
            ClientMessage::Leave => "x".to_string(),
            ClientMessage::Log(text) => format!("l{}", text),
            ClientMessage::Ignored { raw, .. } => raw.clone(),
        }
    }

    pub fn decode(raw: &str) -> Self {
        let ignored = |reason| ClientMessage::Ignored {
            raw: raw.to_string(),
            reason,
        };
        let Some((cmd, param)) = split_command(raw) else {
            return ignored("empty message");
        };

        match cmd {
            'n' => ClientMessage::SetName(param.to_string()),
            'j' => match param.trim().parse() {
                Ok(index) => ClientMessage::Jump(index),
                Err(_) => ignored("jump index is not numeric"),
            },
            'r' => match ResponseBits::parse(param) {
                Some(bits) => ClientMessage::Respond(bits),
                None => ignored("response is not numeric"),
            },
            'x' => ClientMessage::Leave,
            'l' => ClientMessage::Log(param.to_string()),
            _ => ignored("unknown command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_wire_format() {
        let msg = HostMessage::Question {
            position: CardPosition { index: 4, total: 20 },
            question: Question::new("softball", "Cats or dogs?", &["cats", "dogs"]),
        };
        assert_eq!(msg.encode(), "q4@20@softball@Cats or dogs?@cats@dogs");
        assert_eq!(HostMessage::decode(&msg.encode()), msg);
    }

    #[test]
    fn test_question_without_answers() {
        let decoded = HostMessage::decode("q0@3@activities@vote: go bowling?");
        match decoded {
            HostMessage::Question { question, .. } => {
                assert!(question.answers.is_empty());
                assert_eq!(question.prompt, "vote: go bowling?");
            }
            other => panic!("Expected question, got {:?}", other),
        }
    }

    #[test]
    fn test_short_question_is_ignored() {
        assert!(matches!(
            HostMessage::decode("q1@2@softball"),
            HostMessage::Ignored { .. }
        ));
        assert!(matches!(
            HostMessage::decode("qa@b@softball@prompt"),
            HostMessage::Ignored { .. }
        ));
    }

    #[test]
    fn test_roster_wire_format() {
        let msg = HostMessage::Roster(vec![
            RosterEntry {
                name: "alice".to_string(),
                response: ResponseBits::decode(10),
            },
            RosterEntry {
                name: "bob".to_string(),
                response: ResponseBits::EMPTY,
            },
        ]);
        assert_eq!(msg.encode(), "palice 10@bob 0");
    }

    #[test]
    fn test_roster_skips_malformed_lines() {
        let decoded = HostMessage::decode("palice 10@garbage@bob x@carol 1 2");
        assert_eq!(
            decoded,
            HostMessage::Roster(vec![
                RosterEntry {
                    name: "alice".to_string(),
                    response: ResponseBits::decode(10),
                },
                RosterEntry {
                    name: "bob".to_string(),
                    response: ResponseBits::EMPTY,
                },
            ])
        );
        assert_eq!(HostMessage::decode("p"), HostMessage::Roster(vec![]));
    }

    #[test]
    fn test_host_commands() {
        assert_eq!(HostMessage::decode("k"), HostMessage::Kick);
        assert_eq!(HostMessage::decode("x"), HostMessage::Shutdown);
        assert_eq!(HostMessage::decode("v3"), HostMessage::Version(3));
        assert_eq!(
            HostMessage::decode("lhello"),
            HostMessage::Log("hello".to_string())
        );
        assert!(matches!(
            HostMessage::decode("vthree"),
            HostMessage::Ignored { .. }
        ));
    }

    #[test]
    fn test_client_commands() {
        assert_eq!(
            ClientMessage::decode("nalice"),
            ClientMessage::SetName("alice".to_string())
        );
        assert_eq!(
            ClientMessage::decode("n"),
            ClientMessage::SetName(String::new())
        );
        assert_eq!(ClientMessage::decode("j12"), ClientMessage::Jump(12));
        assert_eq!(
            ClientMessage::decode("r18"),
            ClientMessage::Respond(ResponseBits::decode(18))
        );
        assert_eq!(ClientMessage::decode("x"), ClientMessage::Leave);
        assert_eq!(ClientMessage::Respond(ResponseBits::decode(18)).encode(), "r18");
        assert_eq!(ClientMessage::Jump(3).encode(), "j3");
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        for raw in ["", "z42", "jx", "r", "rnope"] {
            assert!(
                matches!(ClientMessage::decode(raw), ClientMessage::Ignored { .. }),
                "{:?} should be ignored",
                raw
            );
        }
        assert!(matches!(
            HostMessage::decode("?"),
            HostMessage::Ignored { .. }
        ));
    }
}
