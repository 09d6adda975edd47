use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a replica, its `host:port` address.
pub type ReplicaId = String;

/// Orders competing proposals within one slot.
///
/// Only `round` takes part in comparisons; `proposer` is carried for
/// diagnostics, so two proposers may hold the same round.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Round number, 0 means nothing promised yet.
    pub round: u64,
    /// Replica which chose this round.
    pub proposer: ReplicaId,
}

impl Sequence {
    /// A sequence for `round` chosen by `proposer`.
    pub fn new(round: u64, proposer: impl Into<ReplicaId>) -> Self {
        Self {
            round,
            proposer: proposer.into(),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={}/{}", self.round, self.proposer)
    }
}

/// An opaque client request.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command text, e.g. `put k v`.
    pub text: String,
    /// Replica the request was issued at.
    pub origin: ReplicaId,
    /// Request tag, unique among in-flight requests of `origin`.
    pub tag: u64,
    /// Sequence this command was last accepted under, round 0 if never.
    pub accepted_under: Sequence,
}

impl Command {
    /// A fresh request which has not been accepted anywhere.
    pub fn new(text: impl Into<String>, origin: impl Into<ReplicaId>, tag: u64) -> Self {
        Self {
            text: text.into(),
            origin: origin.into(),
            tag,
            accepted_under: Sequence::default(),
        }
    }

    /// Whether both are the same logical request, regardless of the sequence
    /// they were accepted under.
    pub fn same_request(&self, other: &Command) -> bool {
        self.text == other.text && self.origin == other.origin && self.tag == other.tag
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{'{}'}}", self.text)
    }
}

/// One position of the replicated log.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Position in the log.
    pub index: usize,
    /// Highest sequence promised for this slot.
    pub promise: Sequence,
    /// Command accepted or decided for this slot.
    pub command: Option<Command>,
    /// Once set, `command` never changes.
    pub decided: bool,
}

impl Slot {
    /// An undecided slot with nothing promised.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Undecided and without any accepted command.
    pub fn is_open(&self) -> bool {
        !self.decided && self.command.is_none()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.decided { "Decided" } else { "Undecided" };
        match &self.command {
            Some(command) => write!(f, "[{}] {} {}, {}", self.index, state, command, self.promise),
            None => write!(f, "[{}] {} {{}}, {}", self.index, state, self.promise),
        }
    }
}
