//! Hosting and joining sessions
//!
//! A [`SessionContext`] is created per hosting or joining attempt and handed
//! to every task of that attempt. Cancelling its token tears the whole
//! attempt down.

pub mod client;
pub mod host;

pub use client::{join, ClientExit, ClientHandle, Replica};
pub use host::{host, HostHandle};

use crate::link::{Connector, LinkTimeouts};
use crate::rendezvous::RendezvousClient;
use crate::retry::{Backoff, Supervisor};
use crate::response::Marker;
use crate::state::GameView;
use crate::types::Intent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a failed peer stays visible before it is forgotten
pub const FAILED_PEER_GRACE: Duration = Duration::from_secs(5);

/// Sessions shorter than this reconnect only after a cool-down
pub const SHORT_SESSION: Duration = Duration::from_secs(60);

/// Time granted to queued messages before a transport is closed
pub const CLOSE_FLUSH: Duration = Duration::from_millis(200);

/// Presentation callbacks, invoked after every state change
pub trait Renderer: Send + Sync {
    fn render(&self, view: &GameView);

    /// Connection diagnostics, e.g. `client 3: uploading offer`
    fn network_status(&self, status: &str);
}

/// Shared collaborators and settings for one hosting or joining attempt
#[derive(Clone)]
pub struct SessionContext {
    pub rendezvous: RendezvousClient,
    pub connector: Arc<dyn Connector>,
    pub renderer: Arc<dyn Renderer>,
    pub timeouts: LinkTimeouts,
    pub backoff: Backoff,
    pub failed_peer_grace: Duration,
    pub short_session: Duration,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(
        rendezvous: RendezvousClient,
        connector: Arc<dyn Connector>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            rendezvous,
            connector,
            renderer,
            timeouts: LinkTimeouts::default(),
            backoff: Backoff::default(),
            failed_peer_grace: FAILED_PEER_GRACE,
            short_session: SHORT_SESSION,
            cancel: CancellationToken::new(),
        }
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.backoff, self.cancel.clone())
    }
}

/// Plain-text renderer for terminals
#[derive(Debug, Default)]
pub struct TextRenderer;

impl TextRenderer {
    pub fn format_view(view: &GameView) -> String {
        let mut out = format!(
            "== {}, category {} ==\n{}\n",
            view.position,
            view.question.category,
            view.question.text()
        );
        for (i, answer) in view.question.answers.iter().enumerate() {
            out.push_str(&format!("  {}) {}\n", i + 1, answer));
        }
        for entry in &view.roster {
            let mut marks = String::new();
            if entry.response.answerer {
                marks.push_str(" [hot seat]");
            }
            if entry.response.is_answered() {
                marks.push_str(" [answered]");
            }
            if view.reveal.is_revealed() {
                if let Some(answer) = entry.response.answer {
                    marks.push_str(&format!(" -> {}", answer));
                }
            }
            out.push_str(&format!("  * {}{}\n", entry.name, marks));
        }
        out.push_str(&format!("{} {}", view.status.emoji(), view.status.description()));
        out
    }
}

impl Renderer for TextRenderer {
    fn render(&self, view: &GameView) {
        println!("{}\n", Self::format_view(view));
    }

    fn network_status(&self, status: &str) {
        if !status.is_empty() {
            println!("network: {}", status);
        }
    }
}

/// Terminal commands: `1`-`7` answer, `a`/`n`/`r`/`k` toggle the hot seat,
/// next, reveal and kick markers, `>`/`<` step, `j N` jumps, `name X` renames
pub fn parse_intent(line: &str) -> Option<Intent> {
    let line = line.trim();
    if let Some(name) = line.strip_prefix("name") {
        return Some(Intent::SetName(name.trim().to_string()));
    }
    if let Some(index) = line.strip_prefix("j ") {
        return index.trim().parse().ok().map(Intent::Jump);
    }
    match line {
        "a" => Some(Intent::Toggle(Marker::Answerer)),
        "n" => Some(Intent::Toggle(Marker::Next)),
        "r" => Some(Intent::Toggle(Marker::Reveal)),
        "k" => Some(Intent::Toggle(Marker::Kick)),
        ">" => Some(Intent::Next),
        "<" => Some(Intent::Prev),
        _ => match line.parse::<u8>() {
            Ok(answer) if (1..=crate::response::MAX_ANSWER).contains(&answer) => {
                Some(Intent::Answer(answer))
            }
            _ => None,
        },
    }
}
