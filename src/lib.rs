//! peerhub — WebSocket peer rendezvous and signaling relay.
//!
//! Clients connect over a single WebSocket endpoint, receive a generated
//! identity plus a snapshot of the current membership, and exchange
//! offer/answer/candidate/text envelopes routed either to one addressed
//! peer or broadcast to everyone else. A periodic heartbeat sweep evicts
//! connections that have gone silent.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod websocket;

pub use server::Server;
