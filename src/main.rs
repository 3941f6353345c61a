use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use awocards::{
    config::{Config, Mode},
    deck::{load_questions, sample_questions},
    link::WebRtcConnector,
    relay::{self, Relay},
    rendezvous::RendezvousClient,
    session::{self, parse_intent, ClientExit, SessionContext, TextRenderer},
    state::HostState,
    store::JsonFileStore,
    types::{validate_name, Intent},
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "awocards=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting awocards...");
    let config = Config::from_env();

    match config.mode {
        Mode::Relay => run_relay(&config).await,
        Mode::Host => run_host(&config).await,
        Mode::Join => run_join(&config).await,
    }
}

async fn run_relay(config: &Config) {
    let listener = tokio::net::TcpListener::bind(config.relay_addr)
        .await
        .unwrap();
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        trigger.cancel();
    });
    relay::serve(listener, Arc::new(Relay::new()), shutdown)
        .await
        .unwrap();
}

fn context(config: &Config) -> Option<SessionContext> {
    let connector = match WebRtcConnector::new(config.ice_urls.clone()) {
        Ok(connector) => connector,
        Err(e) => {
            tracing::error!("Failed to set up WebRTC: {}", e);
            return None;
        }
    };
    let rendezvous = RendezvousClient::new(
        config.signaling_url.clone(),
        config.key_prefix.clone(),
        config.session.clone(),
    );
    Some(SessionContext::new(
        rendezvous,
        Arc::new(connector),
        Arc::new(TextRenderer),
    ))
}

fn display_name(config: &Config) -> String {
    if config.name.is_empty() || validate_name(&config.name) {
        config.name.clone()
    } else {
        tracing::warn!("Invalid name {:?}, spectating instead", config.name);
        String::new()
    }
}

/// Feed stdin lines as intents until `quit`, EOF or Ctrl-C
async fn read_intents(send: impl Fn(Intent)) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim() == "quit" => return,
            Ok(Some(line)) => match parse_intent(&line) {
                Some(intent) => send(intent),
                None => println!("unknown command: {}", line.trim()),
            },
            Ok(None) | Err(_) => return,
        }
    }
}

async fn run_host(config: &Config) {
    let Some(ctx) = context(config) else {
        return;
    };

    let questions = match &config.questions_path {
        Some(path) => match load_questions(path) {
            Ok(questions) => questions,
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                return;
            }
        },
        None => sample_questions(),
    };
    let store = JsonFileStore::new(&config.savegame_path);
    let deck = session::host::restore_deck(
        questions,
        config.categories.clone(),
        config.seed,
        &store,
    );
    let state = HostState::new(&display_name(config), Box::new(deck), Box::new(store));

    let handle = session::host(ctx, state);
    println!("Hosting. Join code: {}", handle.session());
    read_intents(|intent| handle.intent(intent)).await;
    handle.stop().await;
}

async fn run_join(config: &Config) {
    let Some(ctx) = context(config) else {
        return;
    };

    let handle = session::join(ctx, display_name(config));
    let cancel = handle.cancel_token();
    tokio::select! {
        _ = read_intents(|intent| handle.intent(intent)) => {}
        _ = cancel.cancelled() => {}
    }
    if let ClientExit::VersionMismatch { host, ours } = handle.stop().await {
        eprintln!(
            "The host runs protocol version {} but this build speaks {}, update and try again.",
            host, ours
        );
    }
}
