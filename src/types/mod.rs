//! Types and traits that are used across multiple components of the database.
//!
//! Other types, specific to single components, can be found next to those components, e.g.,
//! [`crate::state::rules`].

pub mod crypto_primitives;

pub mod data_types;

pub mod value;

pub mod path;

pub mod transaction;

pub mod block;
