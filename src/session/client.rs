//! Client replica and join loop
//!
//! The client renders purely from the last `q`/`p` it received. Its own
//! clicks go to the host as whole response values and show as syncing until
//! the next roster broadcast carries the host's verdict.

use super::{SessionContext, CLOSE_FLUSH};
use crate::link::{establish_client, Channel, ClientLinkState, Link, LinkError, LinkEvent};
use crate::protocol::{ClientMessage, HostMessage, RosterEntry};
use crate::response::ResponseBits;
use crate::state::GameView;
use crate::types::{CardPosition, Intent, Question, PROTOCOL_VERSION};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a host message did to the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaEvent {
    Updated,
    Unchanged,
    Kicked,
    Shutdown,
    VersionMismatch(u32),
}

#[derive(Debug, Clone, Default)]
pub struct Replica {
    name: String,
    kicked: bool,
    position: CardPosition,
    question: Option<Question>,
    roster: Vec<RosterEntry>,
    /// Latest own response: the last click, or the host's last echo
    sent: Option<ResponseBits>,
}

impl Replica {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Name the host knows us by; empty while spectating or after a kick
    pub fn name(&self) -> &str {
        if self.kicked {
            ""
        } else {
            &self.name
        }
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked
    }

    /// First message on a fresh channel. Kicked clients stay quiet.
    ///
    /// Everything learned from the previous link is dropped, so no click can
    /// be built on a stale card before the host's `q` and `p` arrive.
    pub fn on_connected(&mut self) -> Option<ClientMessage> {
        self.sent = None;
        self.question = None;
        self.position = CardPosition::default();
        self.roster.clear();
        if self.name().is_empty() {
            None
        } else {
            Some(ClientMessage::SetName(self.name.clone()))
        }
    }

    pub fn apply(&mut self, message: HostMessage) -> ReplicaEvent {
        match message {
            HostMessage::Question { position, question } => {
                self.position = position;
                self.question = Some(question);
                ReplicaEvent::Updated
            }
            HostMessage::Roster(roster) => {
                self.sent = roster
                    .iter()
                    .find(|e| !self.name().is_empty() && e.name == self.name())
                    .map(|e| e.response);
                self.roster = roster;
                ReplicaEvent::Updated
            }
            HostMessage::Kick => {
                tracing::warn!("Kicked out of the game due to inactivity");
                self.kicked = true;
                self.sent = None;
                ReplicaEvent::Kicked
            }
            HostMessage::Version(version) if version != PROTOCOL_VERSION => {
                ReplicaEvent::VersionMismatch(version)
            }
            HostMessage::Version(_) => ReplicaEvent::Unchanged,
            HostMessage::Shutdown => ReplicaEvent::Shutdown,
            HostMessage::Log(text) => {
                tracing::info!("Host log request: {}", text);
                ReplicaEvent::Unchanged
            }
            HostMessage::Ignored { raw, reason } => {
                tracing::warn!("Unhandled message from host: {:?} ({})", raw, reason);
                ReplicaEvent::Unchanged
            }
        }
    }

    fn own_response(&self) -> Option<ResponseBits> {
        let name = self.name();
        let entry = self.roster.iter().find(|e| !name.is_empty() && e.name == name)?;
        Some(self.sent.unwrap_or(entry.response))
    }

    /// Translate a local action into at most one wire command
    pub fn intent(&mut self, intent: Intent) -> Option<ClientMessage> {
        match intent {
            Intent::SetName(name) => {
                self.name = name.clone();
                self.kicked = false;
                Some(ClientMessage::SetName(name))
            }
            Intent::Answer(answer) => {
                let response = self.own_response()?.clicked_answer(answer);
                self.sent = Some(response);
                Some(ClientMessage::Respond(response))
            }
            Intent::Toggle(marker) => {
                let response = self.own_response()?.toggled(marker);
                self.sent = Some(response);
                Some(ClientMessage::Respond(response))
            }
            Intent::Next => {
                self.question.as_ref()?;
                (self.position.index < self.position.total)
                    .then(|| ClientMessage::Jump(self.position.index + 2))
            }
            Intent::Prev => {
                self.question.as_ref()?;
                (self.position.index > 0).then(|| ClientMessage::Jump(self.position.index))
            }
            Intent::Jump(index) => Some(ClientMessage::Jump(index)),
        }
    }

    /// Nothing to show until the first question arrived
    pub fn view(&self) -> Option<GameView> {
        let question = self.question.clone()?;
        Some(GameView::build(
            self.position,
            question,
            self.roster.clone(),
            self.name(),
            self.sent,
        ))
    }
}

/// Why a client session ended for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    Stopped,
    /// The host speaks another protocol version; reload with a matching build
    VersionMismatch { host: u32, ours: u32 },
}

/// Control surface of a running client session
pub struct ClientHandle {
    intents: mpsc::UnboundedSender<Intent>,
    views: watch::Receiver<Option<GameView>>,
    cancel: CancellationToken,
    task: JoinHandle<ClientExit>,
}

impl ClientHandle {
    pub fn intent(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            tracing::debug!("Client session already ended, dropping intent");
        }
    }

    pub fn views(&self) -> watch::Receiver<Option<GameView>> {
        self.views.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Leave gracefully (`x`) and wait for the session to wind down
    pub async fn stop(self) -> ClientExit {
        self.cancel.cancel();
        self.wait().await
    }

    pub async fn wait(self) -> ClientExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!("Client task panicked: {}", e);
                ClientExit::Stopped
            }
        }
    }
}

/// Start joining `ctx`'s session; reconnects until stopped
pub fn join(ctx: SessionContext, name: impl Into<String>) -> ClientHandle {
    let (intents, intents_rx) = mpsc::unbounded_channel();
    let (views_tx, views) = watch::channel(None);
    let cancel = ctx.cancel.clone();
    let task = tokio::spawn(run(ctx, Replica::new(name), intents_rx, views_tx));
    ClientHandle {
        intents,
        views,
        cancel,
        task,
    }
}

enum Ended {
    Stopped,
    Lost(String),
    VersionMismatch(u32),
}

async fn run(
    ctx: SessionContext,
    mut replica: Replica,
    mut intents: mpsc::UnboundedReceiver<Intent>,
    views: watch::Sender<Option<GameView>>,
) -> ClientExit {
    tracing::info!("Joining session {}", ctx.rendezvous.session());
    let supervisor = ctx.supervisor();
    let renderer = ctx.renderer.clone();
    let report_error = |status: String| renderer.network_status(&status);
    let report_state = |state: ClientLinkState| renderer.network_status(&state.to_string());

    loop {
        let link = supervisor
            .run("join", &report_error, || {
                establish_client(
                    ctx.connector.as_ref(),
                    &ctx.rendezvous,
                    &ctx.timeouts,
                    &ctx.cancel,
                    &report_state,
                )
            })
            .await;
        let Ok(link) = link else {
            return ClientExit::Stopped;
        };
        ctx.renderer.network_status("");

        let started = Instant::now();
        match serve(&ctx, link, &mut replica, &mut intents, &views).await {
            Ended::Stopped => return ClientExit::Stopped,
            Ended::VersionMismatch(host) => {
                tracing::error!(
                    "Host runs protocol version {}, this build speaks {}",
                    host,
                    PROTOCOL_VERSION
                );
                ctx.renderer.network_status(&format!(
                    "error: host runs version {}, reload with a matching build",
                    host
                ));
                ctx.cancel.cancel();
                return ClientExit::VersionMismatch {
                    host,
                    ours: PROTOCOL_VERSION,
                };
            }
            Ended::Lost(reason) => {
                tracing::warn!("{}, reconnecting", reason);
                ctx.renderer
                    .network_status(&format!("error: {} (will try reconnecting soon)", reason));
                if started.elapsed() < ctx.short_session
                    && supervisor
                        .pause::<LinkError>(ctx.backoff.delay())
                        .await
                        .is_err()
                {
                    return ClientExit::Stopped;
                }
            }
        }
    }
}

fn publish(ctx: &SessionContext, replica: &Replica, views: &watch::Sender<Option<GameView>>) {
    if let Some(view) = replica.view() {
        ctx.renderer.render(&view);
        views.send_replace(Some(view));
    }
}

/// Drive one open link until it drops, the host leaves or we stop
async fn serve(
    ctx: &SessionContext,
    link: Link,
    replica: &mut Replica,
    intents: &mut mpsc::UnboundedReceiver<Intent>,
    views: &watch::Sender<Option<GameView>>,
) -> Ended {
    let Link {
        slot,
        peer: transport,
        channel,
    } = link;
    let Channel {
        outbound,
        mut inbound,
    } = channel;
    tracing::info!("Connected to the host on slot {}", slot);

    if let Some(greeting) = replica.on_connected() {
        let _ = outbound.send(greeting.encode());
    }

    let ended = loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                let _ = outbound.send(ClientMessage::Leave.encode());
                break Ended::Stopped;
            }
            event = inbound.recv() => match event {
                Some(LinkEvent::Message(raw)) => {
                    tracing::debug!("host -> {:?}", raw);
                    match replica.apply(HostMessage::decode(&raw)) {
                        ReplicaEvent::Updated => publish(ctx, replica, views),
                        ReplicaEvent::Kicked => {
                            publish(ctx, replica, views);
                            ctx.renderer.network_status("kicked out due to inactivity, set a name to rejoin");
                        }
                        ReplicaEvent::Unchanged => {}
                        ReplicaEvent::Shutdown => break Ended::Lost("host ended the session".to_string()),
                        ReplicaEvent::VersionMismatch(version) => break Ended::VersionMismatch(version),
                    }
                }
                Some(LinkEvent::Lost) | None => break Ended::Lost("lost connection".to_string()),
            },
            intent = intents.recv() => match intent {
                Some(intent) => {
                    if let Some(message) = replica.intent(intent) {
                        let _ = outbound.send(message.encode());
                        publish(ctx, replica, views);
                    }
                }
                None => {
                    let _ = outbound.send(ClientMessage::Leave.encode());
                    break Ended::Stopped;
                }
            },
        }
    };

    drop(outbound);
    if matches!(ended, Ended::Stopped) {
        tokio::time::sleep(CLOSE_FLUSH).await;
    }
    transport.close().await;
    ended
}
