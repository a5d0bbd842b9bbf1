#![allow(dead_code)]

pub(crate) mod chain;

pub(crate) mod logging;

pub(crate) mod mem_store;

pub(crate) mod network;

pub(crate) mod node;

pub(crate) mod peer;

pub(crate) mod rendezvous;
