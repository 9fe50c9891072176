//! Admission control for relay nodes.
//!
//! Answers one question per connecting client: is this node key known to a
//! network agent running on this host? Agents are discovered as Unix sockets
//! in a configured directory and queried for their live status view.
//!
//! - [`AgentHandle`] queries one agent, one request at a time
//! - [`AgentDirectory`] discovers agents and probes them in order
//! - [`IdentityCache`] remembers which agent last vouched for a key
//! - [`Verifier`] ties the three together
//! - [`AdmissionServer`] exposes `POST /validate` over HTTP

pub mod agent;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod local_api;
pub mod server;
pub mod types;
pub mod verifier;

// Re-export core types
pub use agent::{
    AgentHandle, StatusConnector, StatusSnapshot, StatusSource, DEFAULT_STATUS_TIMEOUT,
};
pub use cache::IdentityCache;
pub use config::AdmissionConfig;
pub use directory::AgentDirectory;
pub use error::AdmissionError;
pub use identity::NodeIdentity;
pub use local_api::{LocalApiClient, LocalApiConnector};
pub use server::AdmissionServer;
pub use types::{AdmitRequest, AdmitResponse};
pub use verifier::Verifier;
