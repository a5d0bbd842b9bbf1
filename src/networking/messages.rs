//! Exhaustive enumerations around every message variant nodes exchange.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    data_types::{BlockHeight, PeerAddress, VerifyingKeyBytes},
    transaction::Transaction,
};

/// All message variants nodes exchange.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`GossipMessage`].
    GossipMessage(GossipMessage),

    /// See: [`ChainSyncMessage`].
    ChainSyncMessage(ChainSyncMessage),
}

/// Messages that spread new blocks and transactions through the network. Processed by the
/// [peer sync client](crate::peer_sync::client).
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum GossipMessage {
    NewBlock(NewBlock),
    NewTransaction(NewTransaction),
}

/// Messages used to bootstrap newcomers and to resolve forks.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ChainSyncMessage {
    ChainRequest(ChainRequest),
    ChainResponse(ChainResponse),
    Hello(Hello),
}

/// A block that its sender has just appended to its chain.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct NewBlock {
    pub block: Block,
}

/// A transaction that its sender has just admitted into its mempool.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct NewTransaction {
    pub transaction: Transaction,
}

/// A request for the recipient's whole chain.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct ChainRequest {
    /// Height of the requester's tip, for logging.
    pub known_height: BlockHeight,
}

/// The responder's whole chain, from genesis to tip.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
}

/// Sent by a node when it joins the network.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Hello {
    pub address: PeerAddress,
    pub identity: VerifyingKeyBytes,
}

impl From<NewBlock> for Message {
    fn from(value: NewBlock) -> Self {
        Message::GossipMessage(GossipMessage::NewBlock(value))
    }
}

impl From<NewTransaction> for Message {
    fn from(value: NewTransaction) -> Self {
        Message::GossipMessage(GossipMessage::NewTransaction(value))
    }
}

impl From<ChainRequest> for Message {
    fn from(value: ChainRequest) -> Self {
        Message::ChainSyncMessage(ChainSyncMessage::ChainRequest(value))
    }
}

impl From<ChainResponse> for Message {
    fn from(value: ChainResponse) -> Self {
        Message::ChainSyncMessage(ChainSyncMessage::ChainResponse(value))
    }
}

impl From<Hello> for Message {
    fn from(value: Hello) -> Self {
        Message::ChainSyncMessage(ChainSyncMessage::Hello(value))
    }
}
