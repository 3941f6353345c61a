// Public API for integration tests and potential library usage

pub mod config;
pub mod deck;
pub mod link;
pub mod protocol;
pub mod relay;
pub mod rendezvous;
pub mod response;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
