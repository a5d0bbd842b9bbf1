//! The closed set of values that can be stored in the [state database](crate::state).

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind, Read, Write},
};

/// The deepest a value may be nested. Mappings and lists each add one level.
pub const MAX_NESTING_DEPTH: usize = 64;

const NULL_TAG: u8 = 0;
const NUMBER_TAG: u8 = 1;
const STRING_TAG: u8 = 2;
const BOOLEAN_TAG: u8 = 3;
const MAPPING_TAG: u8 = 4;
const LIST_TAG: u8 = 5;

/// A JSON-like value.
///
/// Mappings are kept in a [`BTreeMap`] so that iterating over, serializing, and hashing a value always
/// visits keys in the same (sorted) order on every node.
///
/// `Value` is recursive, so its borsh encoding is written by hand: a tag byte, then the variant's body.
/// Mappings and lists are encoded as a `u32` length followed by their entries.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    String(String),
    Boolean(bool),
    Mapping(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Value {
    /// Create an empty mapping.
    pub fn mapping() -> Value {
        Value::Mapping(BTreeMap::new())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Mapping(mapping) => Some(mapping),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check whether every number reachable from this value is finite.
    ///
    /// Non-finite numbers cannot be encoded portably, so they are rejected before they ever reach a block.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Number(number) => number.is_finite(),
            Value::Mapping(mapping) => mapping.values().all(Value::is_finite),
            Value::List(list) => list.iter().all(Value::is_finite),
            Value::Null | Value::String(_) | Value::Boolean(_) => true,
        }
    }

    /// Get the value stored under `key` if this value is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|mapping| mapping.get(key))
    }

    /// How many mappings and lists deep this value goes. Scalars have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Value::Mapping(mapping) => 1 + mapping.values().map(Value::depth).max().unwrap_or(0),
            Value::List(list) => 1 + list.iter().map(Value::depth).max().unwrap_or(0),
            Value::Null | Value::Number(_) | Value::String(_) | Value::Boolean(_) => 0,
        }
    }

    fn deserialize_nested<R: Read>(reader: &mut R, depth: usize) -> io::Result<Value> {
        let tag = u8::deserialize_reader(reader)?;
        if matches!(tag, MAPPING_TAG | LIST_TAG) && depth >= MAX_NESTING_DEPTH {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "value is nested too deeply",
            ));
        }

        match tag {
            NULL_TAG => Ok(Value::Null),
            NUMBER_TAG => Ok(Value::Number(f64::deserialize_reader(reader)?)),
            STRING_TAG => Ok(Value::String(String::deserialize_reader(reader)?)),
            BOOLEAN_TAG => Ok(Value::Boolean(bool::deserialize_reader(reader)?)),
            MAPPING_TAG => {
                let len = u32::deserialize_reader(reader)?;
                let mut mapping = BTreeMap::new();
                for _ in 0..len {
                    let key = String::deserialize_reader(reader)?;
                    let value = Value::deserialize_nested(reader, depth + 1)?;
                    mapping.insert(key, value);
                }
                Ok(Value::Mapping(mapping))
            }
            LIST_TAG => {
                let len = u32::deserialize_reader(reader)?;
                let mut list = Vec::new();
                for _ in 0..len {
                    list.push(Value::deserialize_nested(reader, depth + 1)?);
                }
                Ok(Value::List(list))
            }
            unknown => Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("unknown value tag {}", unknown),
            )),
        }
    }
}

fn serialize_len<W: Write>(len: usize, writer: &mut W) -> io::Result<()> {
    u32::try_from(len)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "too many entries"))?
        .serialize(writer)
}

impl BorshSerialize for Value {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Value::Null => NULL_TAG.serialize(writer),
            Value::Number(number) => {
                NUMBER_TAG.serialize(writer)?;
                number.serialize(writer)
            }
            Value::String(string) => {
                STRING_TAG.serialize(writer)?;
                string.serialize(writer)
            }
            Value::Boolean(boolean) => {
                BOOLEAN_TAG.serialize(writer)?;
                boolean.serialize(writer)
            }
            Value::Mapping(mapping) => {
                MAPPING_TAG.serialize(writer)?;
                serialize_len(mapping.len(), writer)?;
                for (key, value) in mapping {
                    key.serialize(writer)?;
                    value.serialize(writer)?;
                }
                Ok(())
            }
            Value::List(list) => {
                LIST_TAG.serialize(writer)?;
                serialize_len(list.len(), writer)?;
                for value in list {
                    value.serialize(writer)?;
                }
                Ok(())
            }
        }
    }
}

impl BorshDeserialize for Value {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Value::deserialize_nested(reader, 0)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Mapping(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[test]
fn nested_value_encoding_test() {
    let value: Value = [
        ("name", Value::from("chaindb")),
        ("count", Value::Number(3.0)),
        (
            "nested",
            Value::List(vec![Value::Null, Value::Boolean(true), Value::mapping()]),
        ),
    ]
    .into_iter()
    .collect();
    assert_eq!(value.depth(), 2);

    let bytes = value.try_to_vec().unwrap();
    assert_eq!(Value::try_from_slice(&bytes).unwrap(), value);

    // Unknown tags are rejected rather than guessed at.
    assert!(Value::try_from_slice(&[9]).is_err());

    // So are values nested deeper than any valid transaction could carry.
    let mut deep = Value::Null;
    for _ in 0..=MAX_NESTING_DEPTH {
        deep = Value::List(vec![deep]);
    }
    let bytes = deep.try_to_vec().unwrap();
    assert!(Value::try_from_slice(&bytes).is_err());
}
