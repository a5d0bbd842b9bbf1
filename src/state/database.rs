//! The hierarchical key/value tree that transactions are replayed into.

use std::collections::BTreeMap;

use crate::types::{
    crypto_primitives::{encode, hash_parts},
    data_types::CryptoHash,
    path::Path,
    value::Value,
};

/// A tree of [`Value::Mapping`] nodes keyed by path segments.
///
/// The root is always a mapping. A `StateDatabase` is never mutated outside of
/// [replay](super::WorldState::apply_block), so its contents are always the fold of some chain.
#[derive(Clone, Debug, PartialEq)]
pub struct StateDatabase {
    root: BTreeMap<String, Value>,
}

impl Default for StateDatabase {
    fn default() -> Self {
        StateDatabase::new()
    }
}

impl StateDatabase {
    /// Create an empty state database.
    pub fn new() -> StateDatabase {
        StateDatabase {
            root: BTreeMap::new(),
        }
    }

    /// Get a copy of the subtree at `path`, or `None` if nothing is stored there. Reading the root gives
    /// the whole tree as a mapping.
    pub fn read(&self, path: &Path) -> Option<Value> {
        if path.is_root() {
            return Some(Value::Mapping(self.root.clone()));
        }
        self.get(path).cloned()
    }

    /// Borrow the value at `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        let (last, ancestors) = path.segments().split_last()?;
        let mut node = &self.root;
        for segment in ancestors {
            node = node.get(segment)?.as_mapping()?;
        }
        node.get(last)
    }

    /// Replace the subtree rooted at `path` with `value`.
    ///
    /// Missing ancestors are created as empty mappings, and ancestors holding scalars or lists are replaced
    /// with mappings. Setting the root is a no-op: transactions that try to do so are malformed and never
    /// reach replay.
    pub fn set(&mut self, path: &Path, value: Value) {
        let Some((last, ancestors)) = path.segments().split_last() else {
            return;
        };
        let mut node = &mut self.root;
        for segment in ancestors {
            let child = node
                .entry(segment.clone())
                .or_insert_with(Value::mapping);
            if !matches!(child, Value::Mapping(_)) {
                *child = Value::mapping();
            }
            let Value::Mapping(mapping) = child else {
                return;
            };
            node = mapping;
        }
        node.insert(last.clone(), value);
    }

    /// Add `delta` to the number at `path`.
    ///
    /// An absent or `Null` value counts as 0, and missing ancestors are created. Fails without changing
    /// anything if the value at `path` is present and not a number, if an ancestor holds something other
    /// than a mapping, or if the result is not finite.
    pub fn increase(&mut self, path: &Path, delta: f64) -> Result<f64, IncreaseError> {
        let current = match self.probe(path)? {
            Some(Value::Number(number)) => *number,
            Some(Value::Null) | None => 0.0,
            Some(_) => {
                return Err(IncreaseError::NotANumber { path: path.clone() });
            }
        };
        let result = current + delta;
        if !result.is_finite() {
            return Err(IncreaseError::NotFinite { path: path.clone() });
        }
        self.set(path, Value::Number(result));
        Ok(result)
    }

    /// Like [`get`](Self::get), but distinguishes "absent" from "blocked by a non-mapping ancestor".
    fn probe(&self, path: &Path) -> Result<Option<&Value>, IncreaseError> {
        let Some((last, ancestors)) = path.segments().split_last() else {
            return Err(IncreaseError::NotANumber { path: path.clone() });
        };
        let mut node = &self.root;
        for segment in ancestors {
            match node.get(segment) {
                None | Some(Value::Null) => return Ok(None),
                Some(Value::Mapping(mapping)) => node = mapping,
                Some(_) => {
                    return Err(IncreaseError::BlockedByScalar { path: path.clone() });
                }
            }
        }
        Ok(node.get(last))
    }

    /// The hash of the canonical encoding of the whole tree. Two databases with equal contents always
    /// have equal digests.
    pub fn digest(&self) -> CryptoHash {
        hash_parts(&[encode(&self.root)])
    }

    /// The canonical encoding of the whole tree.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.root)
    }
}

/// Why a single path of an Increase could not be applied.
#[derive(Clone, Debug, PartialEq)]
pub enum IncreaseError {
    /// The value at the path is present and is not a number.
    NotANumber { path: Path },

    /// An ancestor of the path holds a scalar or a list, so the path cannot exist.
    BlockedByScalar { path: Path },

    /// The sum overflowed to infinity.
    NotFinite { path: Path },
}

#[test]
fn set_replaces_scalar_ancestors_test() {
    let mut db = StateDatabase::new();
    let path = Path::parse("test/comeonnnnnnn").unwrap();
    db.set(&path, Value::from("testme"));
    let deeper = Path::parse("test/comeonnnnnnn/new").unwrap();
    db.set(&deeper, [("new", Value::from("path"))].into_iter().collect());

    assert_eq!(
        db.read(&Path::parse("test/comeonnnnnnn/new/new").unwrap()),
        Some(Value::from("path"))
    );
}

#[test]
fn increase_through_scalar_fails_test() {
    let mut db = StateDatabase::new();
    db.set(&Path::parse("test/increase").unwrap(), Value::from(1.0));

    assert_eq!(
        db.increase(&Path::parse("test/increase/first/level").unwrap(), 10.0),
        Err(IncreaseError::BlockedByScalar {
            path: Path::parse("test/increase/first/level").unwrap()
        })
    );
    assert_eq!(db.increase(&Path::parse("test/increase").unwrap(), 1.0), Ok(2.0));
}
