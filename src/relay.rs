//! Local rendezvous relay
//!
//! In-memory implementation of the long-poll key/value relay the
//! rendezvous client talks to:
//!
//! - `POST ?set=<key>[&timeoutms=N][&instance=ID]` with a body hands the
//!   value to exactly one reader. `200` once read, `204` if nobody read it in
//!   time, `409` while another instance has an unread value on the key.
//! - `POST ?get=<key>[&timeoutms=N]` returns `200` with the value or `204`
//!   on timeout.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Used when a request does not name a timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for any long-poll
pub const MAX_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Deserialize)]
pub struct RelayParams {
    pub set: Option<String>,
    pub get: Option<String>,
    pub timeoutms: Option<u64>,
    pub instance: Option<String>,
}

impl RelayParams {
    fn timeout(&self) -> Duration {
        self.timeoutms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
            .min(MAX_TIMEOUT)
    }
}

struct Pending {
    id: u64,
    instance: String,
    value: String,
    delivered: oneshot::Sender<()>,
}

#[derive(Default)]
struct KeyState {
    pending: Option<Pending>,
    waiters: VecDeque<(u64, oneshot::Sender<String>)>,
}

impl KeyState {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.waiters.is_empty()
    }
}

#[derive(Default)]
pub struct Relay {
    keys: Mutex<HashMap<String, KeyState>>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn ticket(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Publish `value` under `key` and wait for a reader
    pub async fn set(&self, key: &str, instance: &str, mut value: String, timeout: Duration) -> StatusCode {
        let id = self.ticket();
        let (delivered, mut delivered_rx) = oneshot::channel();
        {
            let mut keys = self.keys.lock().await;
            let state = keys.entry(key.to_string()).or_default();
            if let Some(pending) = &state.pending {
                if pending.instance != instance {
                    tracing::debug!("set {}: conflict with instance {}", key, pending.instance);
                    return StatusCode::CONFLICT;
                }
            }
            while let Some((_, waiter)) = state.waiters.pop_front() {
                match waiter.send(value) {
                    Ok(()) => return StatusCode::OK,
                    // Reader went away, try the next one
                    Err(v) => value = v,
                }
            }
            state.pending = Some(Pending {
                id,
                instance: instance.to_string(),
                value,
                delivered,
            });
        }

        if let Ok(Ok(())) = tokio::time::timeout(timeout, &mut delivered_rx).await {
            return StatusCode::OK;
        }

        let mut keys = self.keys.lock().await;
        if let Some(state) = keys.get_mut(key) {
            if state.pending.as_ref().is_some_and(|p| p.id == id) {
                state.pending = None;
            }
            if state.is_idle() {
                keys.remove(key);
            }
        }
        match delivered_rx.try_recv() {
            Ok(()) => StatusCode::OK,
            Err(_) => StatusCode::NO_CONTENT,
        }
    }

    /// Wait for a value under `key`
    pub async fn get(&self, key: &str, timeout: Duration) -> Option<String> {
        let id = self.ticket();
        let (waiter, mut value_rx) = oneshot::channel();
        {
            let mut keys = self.keys.lock().await;
            let state = keys.entry(key.to_string()).or_default();
            if let Some(pending) = state.pending.take() {
                let _ = pending.delivered.send(());
                if state.is_idle() {
                    keys.remove(key);
                }
                return Some(pending.value);
            }
            state.waiters.push_back((id, waiter));
        }

        if let Ok(Ok(value)) = tokio::time::timeout(timeout, &mut value_rx).await {
            return Some(value);
        }

        let mut keys = self.keys.lock().await;
        if let Some(state) = keys.get_mut(key) {
            state.waiters.retain(|(waiter_id, _)| *waiter_id != id);
            if state.is_idle() {
                keys.remove(key);
            }
        }
        value_rx.try_recv().ok()
    }
}

pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", post(relay_request))
        .route("/sig", post(relay_request))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(relay)
}

/// POST /sig?set=... or POST /sig?get=...
pub async fn relay_request(
    State(relay): State<Arc<Relay>>,
    Query(params): Query<RelayParams>,
    body: String,
) -> Response {
    let timeout = params.timeout();
    match (&params.set, &params.get) {
        (Some(key), None) => {
            let instance = params.instance.as_deref().unwrap_or("");
            relay.set(key, instance, body, timeout).await.into_response()
        }
        (None, Some(key)) => match relay.get(key, timeout).await {
            Some(value) => (StatusCode::OK, value).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
        _ => (
            StatusCode::BAD_REQUEST,
            "expected exactly one of set or get",
        )
            .into_response(),
    }
}

/// Serve the relay until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Relay listening on http://{}/sig", addr);
    }
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
