//! Environment configuration

use chrono::Datelike;
use rand::Rng;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_SIGNALING_URL: &str = "https://iio.ie/sig";
pub const DEFAULT_KEY_PREFIX: &str = "awocards";
pub const DEFAULT_SAVEGAME: &str = "awocards-savegame.json";
pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:6574";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Host,
    Join,
    /// Run the local rendezvous relay
    Relay,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" => Some(Mode::Host),
            "join" => Some(Mode::Join),
            "relay" => Some(Mode::Relay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub signaling_url: String,
    pub key_prefix: String,
    /// Host code to publish under, or the code to join
    pub session: String,
    /// Empty means spectator
    pub name: String,
    pub seed: u64,
    /// None enables every category
    pub categories: Option<Vec<String>>,
    pub questions_path: Option<PathBuf>,
    pub savegame_path: PathBuf,
    pub ice_urls: Vec<String>,
    pub relay_addr: SocketAddr,
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mode = match var("AWOCARDS_MODE") {
            Some(raw) => Mode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!("Unknown AWOCARDS_MODE {:?}, hosting instead", raw);
                Mode::Host
            }),
            None => Mode::Host,
        };

        let session = var("AWOCARDS_SESSION")
            .unwrap_or_else(|| rand::rng().random_range(1000..10000u32).to_string());

        let seed = match var("AWOCARDS_SEED") {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!("Invalid AWOCARDS_SEED {:?}, using today's seed", raw);
                default_seed()
            }),
            None => default_seed(),
        };

        let categories = var("AWOCARDS_CATEGORIES").map(|raw| {
            raw.split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        });

        let relay_addr = var("AWOCARDS_RELAY_ADDR")
            .and_then(|raw| {
                raw.parse::<SocketAddr>()
                    .map_err(|_| tracing::warn!("Invalid AWOCARDS_RELAY_ADDR {:?}", raw))
                    .ok()
            })
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 6574)));

        let config = Self {
            mode,
            signaling_url: var("AWOCARDS_SIGNALING_URL")
                .unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string()),
            key_prefix: var("AWOCARDS_KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            session,
            name: var("AWOCARDS_NAME").unwrap_or_default(),
            seed,
            categories,
            questions_path: var("AWOCARDS_QUESTIONS").map(PathBuf::from),
            savegame_path: var("AWOCARDS_SAVEGAME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVEGAME)),
            ice_urls: var("AWOCARDS_STUN")
                .unwrap_or_else(|| DEFAULT_STUN.to_string())
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            relay_addr,
        };

        tracing::info!(
            mode = ?config.mode,
            session = %config.session,
            signaling_url = %config.signaling_url,
            seed = config.seed,
            "Config loaded"
        );
        config
    }
}

/// month*100 + day, so everyone playing on the same day gets the same order
pub fn default_seed() -> u64 {
    let today = chrono::Local::now();
    u64::from(today.month() * 100 + today.day())
}
