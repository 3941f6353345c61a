use awocards::deck::Deck;
use awocards::link::{MemoryConnector, MemoryNetwork};
use awocards::relay::{self, Relay};
use awocards::rendezvous::RendezvousClient;
use awocards::response::Marker;
use awocards::retry::Backoff;
use awocards::session::{self, ClientHandle, HostHandle, Renderer, SessionContext};
use awocards::state::{GameView, HostState};
use awocards::store::MemoryStore;
use awocards::types::{Intent, Question};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

/// Keeps every network status line for later inspection
#[derive(Default)]
struct RecordingRenderer {
    statuses: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    fn saw(&self, needle: &str) -> bool {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.contains(needle))
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, _view: &GameView) {}

    fn network_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }
}

struct Harness {
    relay_url: String,
    network: MemoryNetwork,
    _shutdown: CancellationToken,
}

impl Harness {
    async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(relay::serve(listener, Arc::new(Relay::new()), shutdown.clone()));
        Self {
            relay_url: format!("http://{}/sig", addr),
            network: MemoryNetwork::new(),
            _shutdown: shutdown,
        }
    }

    fn context(&self, session: &str, renderer: Arc<dyn Renderer>) -> SessionContext {
        let rendezvous = RendezvousClient::new(self.relay_url.clone(), "awocards-test", session);
        let connector = Arc::new(MemoryConnector::new(self.network.clone()));
        let mut ctx = SessionContext::new(rendezvous, connector, renderer);
        ctx.backoff = Backoff {
            base: Duration::from_millis(100),
            jitter: Duration::from_millis(10),
        };
        ctx.failed_peer_grace = Duration::from_millis(200);
        ctx
    }

    fn host(&self, session: &str, name: &str) -> HostHandle {
        let questions = (0..5)
            .map(|i| Question::new("softball", format!("Question {}?", i), &["a", "b", "c"]))
            .collect();
        let state = HostState::new(
            name,
            Box::new(Deck::new(questions, None, 0)),
            Box::new(MemoryStore::new()),
        );
        session::host(
            self.context(session, Arc::new(RecordingRenderer::default())),
            state,
        )
    }

    fn join(&self, session: &str, name: &str) -> ClientHandle {
        session::join(
            self.context(session, Arc::new(RecordingRenderer::default())),
            name,
        )
    }
}

async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    what: &str,
    pred: impl FnMut(&T) -> bool,
) -> T {
    match tokio::time::timeout(WAIT, rx.wait_for(pred)).await {
        Ok(Ok(value)) => value.clone(),
        _ => panic!("timed out waiting for {}", what),
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn names(view: &GameView) -> Vec<&str> {
    view.roster.iter().map(|e| e.name.as_str()).collect()
}

fn has_players(view: &GameView, expected: &[&str]) -> bool {
    names(view) == expected
}

async fn client_sees(client: &ClientHandle, what: &str, pred: impl Fn(&GameView) -> bool) -> GameView {
    let mut views = client.views();
    wait_for(&mut views, what, |v| v.as_ref().is_some_and(&pred))
        .await
        .unwrap_or_else(|| panic!("no view for {}", what))
}

/// Join, then click and watch the host echo the click back to everybody
#[tokio::test]
async fn test_join_and_response_echo() {
    let harness = Harness::start().await;
    let host = harness.host("1001", "hana");
    let alice = harness.join("1001", "alice");
    let bob = harness.join("1001", "bob");

    let mut host_views = host.views();
    wait_for(&mut host_views, "everybody joined", |v| {
        has_players(v, &["alice", "bob", "hana"])
    })
    .await;
    client_sees(&alice, "alice's roster", |v| has_players(v, &["alice", "bob", "hana"])).await;

    alice.intent(Intent::Toggle(Marker::Answerer));
    alice.intent(Intent::Answer(2));

    let view = client_sees(&bob, "alice in the hot seat", |v| {
        v.hot_seat() == Some("alice")
            && v.roster
                .iter()
                .any(|e| e.name == "alice" && e.response.answer == Some(2))
    })
    .await;
    assert_eq!(view.position.index, 0);
    assert!(!view.is_spectator());

    let view = client_sees(&alice, "alice's echo", |v| {
        v.my_response().and_then(|r| r.answer) == Some(2)
    })
    .await;
    assert_eq!(view.my_response().map(|r| r.answerer), Some(true));

    host.stop().await;
}

/// Two next votes move everybody to the next card with fresh responses
#[tokio::test]
async fn test_next_quorum_advances_everyone() {
    let harness = Harness::start().await;
    let host = harness.host("1002", "");
    let alice = harness.join("1002", "alice");
    let bob = harness.join("1002", "bob");
    let carol = harness.join("1002", "carol");

    let mut host_views = host.views();
    wait_for(&mut host_views, "three players", |v| {
        has_players(v, &["alice", "bob", "carol"])
    })
    .await;
    client_sees(&alice, "alice joined", |v| v.roster.len() == 3).await;
    client_sees(&bob, "bob joined", |v| v.roster.len() == 3).await;

    alice.intent(Intent::Answer(1));
    alice.intent(Intent::Toggle(Marker::Next));
    wait_for(&mut host_views, "one next vote", |v| {
        v.roster.iter().filter(|e| e.response.next).count() == 1
    })
    .await;
    assert_eq!(host_views.borrow().position.index, 0);

    bob.intent(Intent::Toggle(Marker::Next));
    let view = client_sees(&carol, "card 2", |v| v.position.index == 1).await;
    assert_eq!(view.question.prompt, "Question 1?");

    let view = wait_for(&mut host_views, "reset responses", |v| v.position.index == 1).await;
    assert!(view.roster.iter().all(|e| e.response.encode() == 0));

    host.stop().await;
}

/// A kick quorum removes the player who neither answered nor holds the seat
#[tokio::test]
async fn test_kick_quorum_removes_idle_player() {
    let harness = Harness::start().await;
    let host = harness.host("1003", "");
    let alice = harness.join("1003", "alice");
    let bob = harness.join("1003", "bob");
    let carol = harness.join("1003", "carol");

    let mut host_views = host.views();
    wait_for(&mut host_views, "three players", |v| {
        has_players(v, &["alice", "bob", "carol"])
    })
    .await;
    client_sees(&alice, "alice joined", |v| v.roster.len() == 3).await;
    client_sees(&bob, "bob joined", |v| v.roster.len() == 3).await;

    alice.intent(Intent::Answer(1));
    bob.intent(Intent::Toggle(Marker::Answerer));
    wait_for(&mut host_views, "bob in the hot seat", |v| v.hot_seat() == Some("bob")).await;

    alice.intent(Intent::Toggle(Marker::Kick));
    bob.intent(Intent::Toggle(Marker::Kick));

    let view = wait_for(&mut host_views, "carol kicked", |v| {
        has_players(v, &["alice", "bob"])
    })
    .await;
    assert!(view.roster.iter().all(|e| !e.response.kick));

    let view = client_sees(&carol, "carol spectating", |v| v.is_spectator()).await;
    assert_eq!(view.me, "");

    host.stop().await;
}

/// Connectivity loss: the client rejoins under the same name and gets its
/// response back
#[tokio::test]
async fn test_reconnect_restores_player() {
    let harness = Harness::start().await;
    let host = harness.host("1004", "hana");
    let alice = harness.join("1004", "alice");

    let mut host_views = host.views();
    wait_for(&mut host_views, "alice joined", |v| has_players(v, &["alice", "hana"])).await;
    client_sees(&alice, "alice joined", |v| v.roster.len() == 2).await;

    alice.intent(Intent::Answer(3));
    wait_for(&mut host_views, "alice answered", |v| {
        v.roster
            .iter()
            .any(|e| e.name == "alice" && e.response.answer == Some(3))
    })
    .await;

    harness.network.sever_all().await;
    wait_for(&mut host_views, "alice dropped", |v| has_players(v, &["hana"])).await;

    let view = wait_for(&mut host_views, "alice back", |v| has_players(v, &["alice", "hana"])).await;
    let alice_entry = view.roster.iter().find(|e| e.name == "alice").unwrap();
    assert_eq!(alice_entry.response.answer, Some(3));

    client_sees(&alice, "alice sees her answer", |v| {
        v.my_response().and_then(|r| r.answer) == Some(3)
    })
    .await;

    host.stop().await;
}

/// A link that dies soon after it came up is only retried after the backoff
#[tokio::test]
async fn test_quick_reconnect_waits_for_backoff() {
    let harness = Harness::start().await;
    let host = harness.host("1007", "hana");
    let backoff = Duration::from_millis(800);
    let mut ctx = harness.context("1007", Arc::new(RecordingRenderer::default()));
    ctx.backoff = Backoff {
        base: backoff,
        jitter: Duration::ZERO,
    };
    let alice = session::join(ctx, "alice");

    let mut host_views = host.views();
    wait_for(&mut host_views, "alice joined", |v| has_players(v, &["alice", "hana"])).await;

    let severed = tokio::time::Instant::now();
    harness.network.sever_all().await;
    wait_for(&mut host_views, "alice dropped", |v| has_players(v, &["hana"])).await;
    wait_for(&mut host_views, "alice back", |v| has_players(v, &["alice", "hana"])).await;
    assert!(
        severed.elapsed() >= backoff,
        "reconnected after {:?}",
        severed.elapsed()
    );

    alice.stop().await;
    host.stop().await;
}

/// A client that leaves with `x` disappears from the roster
#[tokio::test]
async fn test_client_leave_and_host_shutdown() {
    let harness = Harness::start().await;
    let host = harness.host("1005", "hana");
    let alice = harness.join("1005", "alice");
    let renderer = Arc::new(RecordingRenderer::default());
    let bob = session::join(harness.context("1005", renderer.clone()), "bob");

    let mut host_views = host.views();
    wait_for(&mut host_views, "both joined", |v| {
        has_players(v, &["alice", "bob", "hana"])
    })
    .await;

    alice.stop().await;
    wait_for(&mut host_views, "alice left", |v| has_players(v, &["bob", "hana"])).await;

    host.stop().await;
    wait_until("bob noticed the shutdown", || {
        renderer.saw("host ended the session") || renderer.saw("lost connection")
    })
    .await;
    bob.stop().await;
}

/// Two hosts on one code: the second one is told the code is taken
#[tokio::test]
async fn test_session_code_collision() {
    let harness = Harness::start().await;
    let first = harness.host("1006", "hana");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let renderer = Arc::new(RecordingRenderer::default());
    let questions = vec![Question::new("softball", "Cats or dogs?", &["cats", "dogs"])];
    let state = HostState::new(
        "ida",
        Box::new(Deck::new(questions, None, 0)),
        Box::new(MemoryStore::new()),
    );
    let second = session::host(harness.context("1006", renderer.clone()), state);

    wait_until("collision reported", || renderer.saw("code already taken")).await;

    second.stop().await;
    first.stop().await;
}
