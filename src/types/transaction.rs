/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'transaction' type and its structural validity predicate.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use super::{
    crypto_primitives::{encode, verify_signature, Keypair},
    data_types::{SignatureBytes, Timestamp, TransactionID, VerifyingKeyBytes},
    path::Path,
    value::{Value, MAX_NESTING_DEPTH},
};

/// The state-transition operations a transaction can carry, together with their payloads.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Operation {
    /// Replace the subtree rooted at `reference` with `value`.
    Set { reference: Path, value: Value },

    /// Add each delta to the number currently stored at its path.
    ///
    /// The map is built in input order, so when the same path is given twice the last delta wins.
    Increase { diff: BTreeMap<Path, f64> },

    /// Add `amount` to the signer's entry in the stake table. Only valid in proof-of-stake mode.
    Stake { amount: u64 },
}

impl Operation {
    pub fn set(reference: Path, value: impl Into<Value>) -> Operation {
        Operation::Set {
            reference,
            value: value.into(),
        }
    }

    pub fn increase(diff: impl IntoIterator<Item = (Path, f64)>) -> Operation {
        let mut map = BTreeMap::new();
        for (path, delta) in diff {
            map.insert(path, delta);
        }
        Operation::Increase { diff: map }
    }

    pub fn stake(amount: u64) -> Operation {
        Operation::Stake { amount }
    }

    /// Get the paths this operation writes to. Used for authorization at admission time.
    pub fn written_paths(&self) -> Vec<&Path> {
        match self {
            Operation::Set { reference, .. } => vec![reference],
            Operation::Increase { diff } => diff.keys().collect(),
            Operation::Stake { .. } => Vec::new(),
        }
    }

    /// Check whether every number in the payload is finite. Operations with non-finite numbers cannot be
    /// encoded, and therefore cannot be signed.
    pub fn is_finite(&self) -> bool {
        match self {
            Operation::Set { value, .. } => value.is_finite(),
            Operation::Increase { diff } => diff.values().all(|delta| delta.is_finite()),
            Operation::Stake { .. } => true,
        }
    }

    pub fn is_stake(&self) -> bool {
        matches!(self, Operation::Stake { .. })
    }

    /// Name of the operation, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "Set",
            Operation::Increase { .. } => "Increase",
            Operation::Stake { .. } => "Stake",
        }
    }
}

/// A signed request to change the state database.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub id: TransactionID,
    pub timestamp: Timestamp,
    pub operation: Operation,
    pub signer: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl Transaction {
    /// Create a new transaction with a fresh random id, stamped with the current time and signed by
    /// `keypair`.
    pub fn new(keypair: &Keypair, operation: Operation) -> Transaction {
        Self::new_with(keypair, TransactionID::random(), Timestamp::now(), operation)
    }

    /// Create a transaction with the given `id` and `timestamp`, signed by `keypair`.
    pub fn new_with(
        keypair: &Keypair,
        id: TransactionID,
        timestamp: Timestamp,
        operation: Operation,
    ) -> Transaction {
        let signature = keypair.sign(&Self::signing_payload(&id, timestamp, &operation));
        Transaction {
            id,
            timestamp,
            operation,
            signer: keypair.identity(),
            signature,
        }
    }

    /// The bytes that the signer signs over.
    pub fn signing_payload(id: &TransactionID, timestamp: Timestamp, operation: &Operation) -> Vec<u8> {
        let mut payload = encode(id);
        payload.extend(encode(&timestamp));
        payload.extend(encode(operation));
        payload
    }

    /// Check the shape of the transaction and its signature.
    ///
    /// This is a pure check: it does not look at the state database, so it says nothing about whether
    /// the signer is allowed to write to the paths the transaction touches.
    pub fn validate(&self) -> Result<(), MalformedTransaction> {
        match &self.operation {
            Operation::Set { reference, value } => {
                if reference.is_root() {
                    return Err(MalformedTransaction::RootReference);
                }
                if !reference.is_well_formed() {
                    return Err(MalformedTransaction::MalformedPath {
                        path: reference.clone(),
                    });
                }
                if !value.is_finite() {
                    return Err(MalformedTransaction::NonFiniteNumber);
                }
                if value.depth() > MAX_NESTING_DEPTH {
                    return Err(MalformedTransaction::NestedTooDeeply);
                }
            }
            Operation::Increase { diff } => {
                if diff.is_empty() {
                    return Err(MalformedTransaction::EmptyPayload);
                }
                for (path, delta) in diff {
                    if path.is_root() {
                        return Err(MalformedTransaction::RootReference);
                    }
                    if !path.is_well_formed() {
                        return Err(MalformedTransaction::MalformedPath { path: path.clone() });
                    }
                    if !delta.is_finite() {
                        return Err(MalformedTransaction::NonFiniteNumber);
                    }
                }
            }
            Operation::Stake { amount } => {
                if *amount == 0 {
                    return Err(MalformedTransaction::EmptyPayload);
                }
            }
        }

        let payload = Self::signing_payload(&self.id, self.timestamp, &self.operation);
        if !verify_signature(&self.signer, &payload, &self.signature) {
            return Err(MalformedTransaction::InvalidSignature);
        }

        Ok(())
    }
}

/// Reasons why a transaction is structurally invalid. Malformed transactions are always rejected and
/// never retried.
#[derive(Clone, Debug, PartialEq)]
pub enum MalformedTransaction {
    /// A Set or Increase names the root of the tree, which cannot be written as a whole.
    RootReference,

    /// A path has an empty segment or a segment containing the delimiter.
    MalformedPath { path: Path },

    /// An Increase with no paths, or a Stake of zero.
    EmptyPayload,

    /// A number that is NaN or infinite.
    NonFiniteNumber,

    /// A Set value nested deeper than [`MAX_NESTING_DEPTH`].
    NestedTooDeeply,

    /// The signature does not verify against the signer's key.
    InvalidSignature,
}

impl Display for MalformedTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MalformedTransaction::RootReference => write!(f, "cannot write to the root path"),
            MalformedTransaction::MalformedPath { path } => write!(f, "malformed path {}", path),
            MalformedTransaction::EmptyPayload => write!(f, "empty payload"),
            MalformedTransaction::NonFiniteNumber => write!(f, "number is not finite"),
            MalformedTransaction::NestedTooDeeply => write!(f, "value is nested too deeply"),
            MalformedTransaction::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}
