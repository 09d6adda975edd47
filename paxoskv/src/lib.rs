#![deny(missing_docs)]
#![deny(clippy::all)]
//! Distributed KV Store based on Paxos.

/// KV Store node.
pub mod kv;

/// Interactive front end.
pub mod shell;


pub use kv::Paxoskv;
pub use shell::{Reply, Shell};
