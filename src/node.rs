/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and talk to a node.
//!
//! A node keeps one copy of the replicated database. It holds the chain of blocks that commits the
//! database's write history, the world state derived from that chain, and a mempool of writes that are
//! waiting to be committed. It stays in sync with its peers over a pluggable [network](crate::networking).
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [NodeSpec],
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - [The type](Node) which keeps the node alive, and through which clients read and write the database.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .network(network)
//!     .rendezvous(rendezvous)
//!     .block_store(block_store)
//!     .configuration(configuration)
//!     .on_insert_block(insert_block_handler)
//!     .build()
//!     .start();
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a node:
//! - `.network(...)`
//! - `.rendezvous(...)`
//! - `.block_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_insert_block(...)`
//! - `.on_replace_chain(...)`
//! - `.on_reject_block(...)`
//! - `.on_reject_chain(...)`
//! - `.on_admit_transaction(...)`
//! - `.on_reject_transaction(...)`
//! - `.on_propose(...)`
//! - `.on_preempt_proposal(...)`
//! - `.on_receive_block(...)`
//! - `.on_receive_chain_request(...)`
//! - `.on_send_chain_response(...)`
//! - `.on_update_peers(...)`
//!
//! The node's [configuration](Configuration) can also be defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .address(PeerAddress::new("localhost:3001"))
//!     .consensus(ConsensusKind::ProofOfStake)
//!     .forging_interval(Duration::from_secs(1))
//!     .log_events(true)
//!     .build();
//! ```

use std::{
    fmt::{self, Display, Formatter},
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::Duration,
};

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::{
    chain::{pluggables::BlockStore, ChainManager},
    consensus::{pos::ProofOfStake, pow::ProofOfWork, Consensus, ProposeError},
    event_bus::*,
    events::*,
    mempool::Rejected,
    networking::{messages::NewTransaction, network::Network, receiving::start_polling, sending::SenderHandle},
    peer_sync::{
        client::PeerSyncClient,
        rendezvous::Rendezvous,
        server::{PeerSyncServer, PeerSyncServerConfiguration},
    },
    proposer::{ProposeRequest, Proposer, ProposerConfiguration},
    state::rules::RulePolicy,
    types::{
        block::Block,
        crypto_primitives::Keypair,
        data_types::{Difficulty, PeerAddress, VerifyingKeyBytes},
        path::{Path, PathError},
        transaction::{Operation, Transaction},
        value::Value,
    },
};

/// Which consensus strategy the node runs, with its parameters.
#[derive(Clone, Debug)]
pub enum ConsensusKind {
    ProofOfWork(ProofOfWorkConfiguration),
    ProofOfStake,
}

/// Parameters of the proof-of-work difficulty adjustment.
#[derive(Clone, Debug)]
pub struct ProofOfWorkConfiguration {
    /// Difficulty the block after genesis is adjusted from.
    pub initial_difficulty: Difficulty,
    /// Difficulty never adjusts below this.
    pub min_difficulty: Difficulty,
    /// Blocks found faster than this raise the difficulty by one. Slower blocks lower it by one.
    pub target_block_interval: Duration,
}

/// Stores the user-defined parameters required to start the node, that is:
/// 1. The node's [keypair](ed25519_dalek::SigningKey), used to sign transactions and proof-of-stake
///    blocks.
/// 2. The node's own network address, which it registers with the rendezvous service.
/// 3. The [consensus strategy](ConsensusKind).
/// 4. The maximum number of transactions in a block.
/// 5. The path prefixes under which writes are denied unless a rule explicitly allows them.
/// 6. How often to mine (proof-of-work) or try to forge (proof-of-stake) when the mempool is not empty.
/// 7. How often to ask the rendezvous service for the current peers.
/// 8. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Mining interval
///
/// Under proof-of-work, a node with no mining interval only mines when a client calls
/// [`Node::mine_now`]. Under proof-of-stake, the node tries to forge every forging interval, but only
/// succeeds when it is the selected forger for the next height.
///
/// ## Log Events
///
/// The node logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.address(...)`
    - `.consensus(...)`
    - `.log_events(...)`

    Optional:
    - `.max_block_transactions(...)`
    - `.restricted_prefixes(...)`
    - `.mining_interval(...)`
    - `.forging_interval(...)`
    - `.peer_refresh_interval(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the node's keypair, used to sign transactions and blocks. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the address this node is reachable at. Required."))]
    pub address: PeerAddress,
    #[builder(setter(doc = "Set the consensus strategy. Required."))]
    pub consensus: ConsensusKind,
    #[builder(
        default = 1000,
        setter(doc = "Set the maximum number of transactions in a block. Optional, defaults to 1000.")
    )]
    pub max_block_transactions: usize,
    #[builder(
        default = RulePolicy::default().restricted_prefixes().to_vec(),
        setter(doc = "Set the path prefixes that are write-protected by default. Optional, defaults to `restricted` and `rules`.")
    )]
    pub restricted_prefixes: Vec<Path>,
    #[builder(
        default,
        setter(strip_option, doc = "Set how often to mine when the mempool is not empty, under proof-of-work. Optional.")
    )]
    pub mining_interval: Option<Duration>,
    #[builder(
        default = Duration::from_secs(1),
        setter(doc = "Set how often to try to forge when the mempool is not empty, under proof-of-stake. Optional, defaults to 1 second.")
    )]
    pub forging_interval: Duration,
    #[builder(
        default = Duration::from_secs(5),
        setter(doc = "Set how often to refresh the peer set from the rendezvous service. Optional, defaults to 5 seconds.")
    )]
    pub peer_refresh_interval: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Node].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.network(...)`
    - `.rendezvous(...)`
    - `.block_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_block(...)`
    - `.on_replace_chain(...)`
    - `.on_reject_block(...)`
    - `.on_reject_chain(...)`
    - `.on_admit_transaction(...)`
    - `.on_reject_transaction(...)`
    - `.on_propose(...)`
    - `.on_preempt_proposal(...)`
    - `.on_receive_block(...)`
    - `.on_receive_chain_request(...)`
    - `.on_send_chain_response(...)`
    - `.on_update_peers(...)`
"))]
pub struct NodeSpec<N: Network + 'static, R: Rendezvous, S: BlockStore> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of peer discovery. The argument must implement the [Rendezvous](crate::peer_sync::rendezvous::Rendezvous) trait. Required."))]
    rendezvous: R,
    #[builder(setter(doc = "Set the implementation of chain persistence. The argument must implement the [BlockStore](crate::chain::pluggables::BlockStore) trait. Required."))]
    block_store: S,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is appended to the node's chain. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReplaceChainEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReplaceChainEvent>),
    doc = "Register a handler closure to be invoked after the node's chain is replaced by a heavier one. Optional."))]
    on_replace_chain: Option<HandlerPtr<ReplaceChainEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after the node rejects a block. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectChainEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectChainEvent>),
    doc = "Register a handler closure to be invoked after the node keeps its chain over a competing one. Optional."))]
    on_reject_chain: Option<HandlerPtr<RejectChainEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AdmitTransactionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AdmitTransactionEvent>),
    doc = "Register a handler closure to be invoked after a transaction is admitted into the mempool. Optional."))]
    on_admit_transaction: Option<HandlerPtr<AdmitTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectTransactionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectTransactionEvent>),
    doc = "Register a handler closure to be invoked after a transaction is rejected by the mempool. Optional."))]
    on_reject_transaction: Option<HandlerPtr<RejectTransactionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the node mines or forges a block. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PreemptProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PreemptProposalEvent>),
    doc = "Register a handler closure to be invoked after a block proposal in progress is cancelled. Optional."))]
    on_preempt_proposal: Option<HandlerPtr<PreemptProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockEvent>),
    doc = "Register a handler closure to be invoked after the node receives a block from a peer. Optional."))]
    on_receive_block: Option<HandlerPtr<ReceiveBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveChainRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveChainRequestEvent>),
    doc = "Register a handler closure to be invoked after the node receives a chain request from a peer. Optional."))]
    on_receive_chain_request: Option<HandlerPtr<ReceiveChainRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendChainResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendChainResponseEvent>),
    doc = "Register a handler closure to be invoked after the node sends its chain to a peer. Optional."))]
    on_send_chain_response: Option<HandlerPtr<SendChainResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePeersEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePeersEvent>),
    doc = "Register a handler closure to be invoked after the node's peer set changes. Optional."))]
    on_update_peers: Option<HandlerPtr<UpdatePeersEvent>>,
}

impl<N: Network + 'static, R: Rendezvous, S: BlockStore> NodeSpec<N, R, S> {
    /// Starts all threads and channels associated with running a node, and returns the handles to them
    /// in a [Node] struct.
    pub fn start(self) -> Node<N, S> {
        let configuration = self.configuration;
        let keypair = Keypair::new(configuration.me);
        let consensus = match configuration.consensus {
            ConsensusKind::ProofOfWork(pow) => Consensus::ProofOfWork(ProofOfWork::new(
                pow.initial_difficulty,
                pow.min_difficulty,
                pow.target_block_interval,
            )),
            ConsensusKind::ProofOfStake => {
                Consensus::ProofOfStake(ProofOfStake::new(keypair.clone()))
            }
        };
        let proposal_interval = match consensus {
            Consensus::ProofOfWork(_) => configuration.mining_interval,
            Consensus::ProofOfStake(_) => Some(configuration.forging_interval),
        };

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_insert_block,
            self.on_replace_chain,
            self.on_reject_block,
            self.on_reject_chain,
            self.on_admit_transaction,
            self.on_reject_transaction,
            self.on_propose,
            self.on_preempt_proposal,
            self.on_receive_block,
            self.on_receive_chain_request,
            self.on_send_chain_response,
            self.on_update_peers,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let chain = ChainManager::load(
            self.block_store,
            consensus,
            RulePolicy::new(configuration.restricted_prefixes),
            event_publisher.clone(),
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, gossip, chain_responses, server_messages) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (peer_sync_server_shutdown, peer_sync_server_shutdown_receiver) = mpsc::channel();
        let peer_sync_server = PeerSyncServer::new(
            PeerSyncServerConfiguration {
                me: configuration.address.clone(),
                identity: keypair.identity(),
                peer_refresh_interval: configuration.peer_refresh_interval,
            },
            chain.clone(),
            self.rendezvous,
            server_messages,
            self.network.clone(),
            peer_sync_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (peer_sync_client_shutdown, peer_sync_client_shutdown_receiver) = mpsc::channel();
        let peer_sync_client = PeerSyncClient::new(
            chain.clone(),
            gossip,
            chain_responses,
            self.network.clone(),
            peer_sync_client_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (proposer_shutdown, proposer_shutdown_receiver) = mpsc::channel();
        let (propose_requests, propose_request_receiver) = mpsc::channel();
        let proposer = Proposer::new(
            ProposerConfiguration {
                max_block_transactions: configuration.max_block_transactions,
                interval: proposal_interval,
            },
            chain.clone(),
            self.network.clone(),
            propose_request_receiver,
            proposer_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = match (event_subscriber, event_bus_shutdown_receiver) {
            (Some(event_subscriber), Some(shutdown_receiver)) => Some(start_event_bus(
                event_handlers,
                event_subscriber,
                shutdown_receiver,
            )),
            _ => None,
        };

        Node {
            keypair,
            address: configuration.address,
            chain,
            sender: SenderHandle::new(self.network),
            propose_requests,
            poller: Some(poller),
            poller_shutdown,
            peer_sync_server: Some(peer_sync_server),
            peer_sync_server_shutdown,
            peer_sync_client: Some(peer_sync_client),
            peer_sync_client_shutdown,
            proposer: Some(proposer),
            proposer_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a node, and the interface through which clients use the
/// database. When this value is dropped, all background threads are gracefully shut down.
pub struct Node<N: Network + 'static, S: BlockStore> {
    keypair: Keypair,
    address: PeerAddress,
    chain: ChainManager<S>,
    sender: SenderHandle<N>,
    propose_requests: Sender<ProposeRequest>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    peer_sync_server: Option<JoinHandle<()>>,
    peer_sync_server_shutdown: Sender<()>,
    peer_sync_client: Option<JoinHandle<()>>,
    peer_sync_client_shutdown: Sender<()>,
    proposer: Option<JoinHandle<()>>,
    proposer_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network + 'static, S: BlockStore> Node<N, S> {
    /// Submit a write that replaces the subtree at `reference` with `value`.
    pub fn set(&self, reference: &str, value: impl Into<Value>) -> Result<Transaction, ClientError> {
        let reference = Path::parse(reference)?;
        self.submit(Operation::set(reference, value))
    }

    /// Submit a write that adds each delta to the number stored at its reference.
    pub fn increase<'a>(
        &self,
        diff: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Transaction, ClientError> {
        let diff = diff
            .into_iter()
            .map(|(reference, delta)| Ok((Path::parse(reference)?, delta)))
            .collect::<Result<Vec<(Path, f64)>, PathError>>()?;
        self.submit(Operation::increase(diff))
    }

    /// Submit a stake of `amount` for this node's identity. Only available under proof-of-stake.
    pub fn stake(&self, amount: u64) -> Result<Transaction, ClientError> {
        if !self.chain.consensus().supports_stake() {
            return Err(ClientError::Unsupported);
        }
        self.submit(Operation::stake(amount))
    }

    /// Read the subtree at `reference` in the committed state. `"/"` reads the whole database.
    pub fn get(&self, reference: &str) -> Result<Option<Value>, ClientError> {
        let reference = Path::parse(reference)?;
        Ok(self.chain.read(&reference))
    }

    /// Mine a block with the pending transactions, and wait for it to be appended to the chain. Only
    /// available under proof-of-work.
    pub fn mine_now(&self) -> Result<Block, ClientError> {
        if self.chain.consensus().supports_stake() {
            return Err(ClientError::Unsupported);
        }

        let (result_sender, result_receiver) = mpsc::channel();
        self.propose_requests
            .send(result_sender)
            .map_err(|_| ClientError::Shutdown)?;
        let result = result_receiver.recv().map_err(|_| ClientError::Shutdown)?;
        Ok(result?)
    }

    /// Get a copy of the whole chain, from genesis to tip.
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.snapshot()
    }

    /// Get the [chain manager](ChainManager), for reads beyond the client operations.
    pub fn chain_manager(&self) -> &ChainManager<S> {
        &self.chain
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn identity(&self) -> VerifyingKeyBytes {
        self.keypair.identity()
    }

    /// Sign a transaction carrying `operation`, admit it into the local mempool, and gossip it.
    fn submit(&self, operation: Operation) -> Result<Transaction, ClientError> {
        if !operation.is_finite() {
            return Err(ClientError::NonFiniteNumber);
        }

        let transaction = Transaction::new(&self.keypair, operation);
        self.chain.admit(transaction.clone())?;
        self.sender.clone().broadcast(NewTransaction {
            transaction: transaction.clone(),
        });
        Ok(transaction)
    }
}

impl<N: Network + 'static, S: BlockStore> Drop for Node<N, S> {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads make
        // assumptions about the validity of their channels based on this. The peer sync threads receive
        // messages from the poller, and assume that the poller will live longer than them.

        // Stop any mining in progress, so that the proposer can see its shutdown signal.
        self.chain.cancel_proposal();

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.join().unwrap();
        }

        self.proposer_shutdown.send(()).unwrap();
        self.proposer.take().unwrap().join().unwrap();

        self.peer_sync_client_shutdown.send(()).unwrap();
        self.peer_sync_client.take().unwrap().join().unwrap();

        self.peer_sync_server_shutdown.send(()).unwrap();
        self.peer_sync_server.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}

/// Reasons why a client operation on a [Node] failed.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientError {
    /// The reference could not be parsed.
    Path(PathError),

    /// The mempool did not admit the transaction.
    Rejected(Rejected),

    /// The value or delta is NaN or infinite.
    NonFiniteNumber,

    /// The operation is not available under this node's consensus strategy.
    Unsupported,

    /// Mining did not produce a block.
    Propose(ProposeError),

    /// The node's background threads are shutting down.
    Shutdown,
}

impl From<PathError> for ClientError {
    fn from(value: PathError) -> Self {
        ClientError::Path(value)
    }
}

impl From<Rejected> for ClientError {
    fn from(value: Rejected) -> Self {
        ClientError::Rejected(value)
    }
}

impl From<ProposeError> for ClientError {
    fn from(value: ProposeError) -> Self {
        ClientError::Propose(value)
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Path(err) => write!(f, "invalid reference: {}", err),
            ClientError::Rejected(reason) => write!(f, "transaction rejected: {}", reason),
            ClientError::NonFiniteNumber => write!(f, "numbers must be finite"),
            ClientError::Unsupported => {
                write!(f, "operation not supported by this consensus strategy")
            }
            ClientError::Propose(err) => write!(f, "could not mine a block: {}", err),
            ClientError::Shutdown => write!(f, "node is shutting down"),
        }
    }
}
