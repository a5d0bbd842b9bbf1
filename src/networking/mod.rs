//! Pluggable peer-to-peer (P2P) networking.
//!
//! Library users provide a type implementing [`network::Network`]. The node spawns a poller thread that
//! drains it and routes each [`messages::Message`] to the thread that processes it.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
