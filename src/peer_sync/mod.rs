//! Keeping nodes' chains in sync: peer discovery, gossip of blocks and transactions, bootstrap of
//! newcomers, and fork resolution.
//!
//! Peer sync runs in two threads:
//! 1. The [server](server) answers chain requests and maintains the [peer set](peer_set) using the
//!    pluggable [`Rendezvous`](rendezvous::Rendezvous) service.
//! 2. The [client](client) processes gossip and chain responses, handing them to the
//!    [chain manager](crate::chain::ChainManager).

pub mod rendezvous;

pub mod peer_set;

pub(crate) mod server;

pub(crate) mod client;
