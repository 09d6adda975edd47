#![deny(missing_docs)]
#![deny(clippy::all)]
//! Multi-Paxos over an append-only log of slots, replicating a key-value store.
//!
//! Every replica plays the acceptor for every slot and may propose commands.
//! Each slot reaches consensus independently; decided slots are applied to
//! the [`Store`] strictly in slot order.

use serde::{Deserialize, Serialize};

/// Reply to a Prepare request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReply {
    /// Whether the promise was granted.
    pub okay: bool,
    /// The granted sequence, or the standing promise on refusal.
    pub promise: Sequence,
    /// Command already accepted for the slot, returned with a grant.
    pub command: Option<Command>,
}

/// Reply to an Accept request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReply {
    /// Whether the command was accepted.
    pub okay: bool,
    /// The accepted sequence, or the standing promise on refusal.
    pub promise: Sequence,
}

labrpc::service! {
    service acceptor_svc {
        fn prepare(slot: usize, seq: Sequence) -> PrepareReply;
        fn accept(slot: usize, seq: Sequence, command: Command) -> AcceptReply;
        fn decide(slot: usize, command: Command) -> ();
    }
}

pub use acceptor_svc::{
    Client as AcceptorClient, Server as AcceptorServer, Service as AcceptorService,
};

mod acceptor;
mod config;
mod proposer;
mod quorum;
mod replica;
mod slot;
mod store;


pub use config::Config;
pub use proposer::Proposer;
pub use replica::{Dump, Replica};
pub use slot::{Command, ReplicaId, Sequence, Slot};
pub use store::{Operation, Store};
