use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use labrpc::log::{debug, error, info};
use tokio::sync::oneshot;

use crate::{AcceptReply, Command, Config, PrepareReply, ReplicaId, Sequence, Slot, Store};

/// A member of the cluster: its slot table and applied store behind one lock.
///
/// The acceptor handlers are the only way to change slots or the store.
#[derive(Debug)]
pub struct Replica {
    id: ReplicaId,
    cluster: Vec<ReplicaId>,
    config: Config,
    state: Mutex<ReplicaState>,
}

#[derive(Debug)]
pub(crate) struct ReplicaState {
    id: ReplicaId,
    slots: Vec<Slot>,
    /// Every slot below this index has been applied to `store`.
    applied: usize,
    store: Store,
    /// Waiters for requests issued here, by tag.
    pending: HashMap<u64, oneshot::Sender<String>>,
}

impl Replica {
    /// Create replica `id` of `cluster`. The cluster lists every member,
    /// including `id` itself.
    pub fn new(id: impl Into<ReplicaId>, cluster: Vec<ReplicaId>, config: Config) -> Self {
        let id = id.into();
        Self {
            state: Mutex::new(ReplicaState::new(id.clone())),
            id,
            cluster,
            config,
        }
    }

    /// This replica's identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Every member of the cluster.
    pub fn cluster(&self) -> &[ReplicaId] {
        &self.cluster
    }

    /// Tunables shared with the local proposer.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Smallest number of members forming a quorum.
    pub fn majority(&self) -> usize {
        self.cluster.len() / 2 + 1
    }

    /// A decision contradiction panics while holding this lock; the poisoned
    /// lock then halts the replica.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ReplicaState> {
        self.state
            .lock()
            .expect("replica halted after a decision contradiction")
    }

    /// Lowest slot which is undecided and holds no command, or the first
    /// slot past the table.
    pub fn first_open_slot(&self) -> usize {
        let state = self.lock();
        state
            .slots
            .iter()
            .position(Slot::is_open)
            .unwrap_or_else(|| state.slots.len())
    }

    /// The command decided for `index`, if any.
    pub fn decision(&self, index: usize) -> Option<Command> {
        let state = self.lock();
        state
            .slots
            .get(index)
            .filter(|s| s.decided)
            .and_then(|s| s.command.clone())
    }

    /// Register a waiter for the request tagged `tag` issued at this replica.
    /// It receives the outcome once the request is applied here.
    pub fn register_pending(&self, tag: u64) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if self.lock().pending.insert(tag, tx).is_some() {
            debug!("waiter for tag {} replaced", tag);
        }
        rx
    }

    /// Snapshot of slots and store.
    pub fn dump(&self) -> Dump {
        let state = self.lock();
        Dump {
            id: self.id.clone(),
            cluster: self.cluster.clone(),
            next_unapplied: state.applied,
            slots: state.slots.clone(),
            database: state.store.data().clone(),
        }
    }

    /// Handle a Prepare request.
    pub fn prepare(&self, index: usize, seq: Sequence) -> PrepareReply {
        self.lock().prepare(index, seq)
    }

    /// Handle an Accept request.
    pub fn accept(&self, index: usize, seq: Sequence, command: Command) -> AcceptReply {
        self.lock().accept(index, seq, command)
    }

    /// Handle a Decide request.
    ///
    /// # Panics
    ///
    /// If `index` is already decided with a different request.
    pub fn decide(&self, index: usize, command: Command) {
        self.lock().decide(index, command)
    }
}

impl ReplicaState {
    fn new(id: ReplicaId) -> Self {
        Self {
            id,
            slots: Vec::new(),
            applied: 0,
            store: Store::default(),
            pending: HashMap::new(),
        }
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot {
        while self.slots.len() <= index {
            let next = self.slots.len();
            self.slots.push(Slot::new(next));
        }
        &mut self.slots[index]
    }

    pub(crate) fn prepare(&mut self, index: usize, seq: Sequence) -> PrepareReply {
        let slot = self.slot_mut(index);
        if slot.decided {
            debug!("[{}] prepare: slot already decided", index);
        }
        if seq.round > slot.promise.round {
            debug!("[{}] prepare: promising {} with {:?}", index, seq, slot.command);
            slot.promise = seq.clone();
            PrepareReply {
                okay: true,
                promise: seq,
                command: slot.command.clone(),
            }
        } else {
            debug!("[{}] prepare: rejecting {}, {} already promised", index, seq, slot.promise);
            PrepareReply {
                okay: false,
                promise: slot.promise.clone(),
                command: None,
            }
        }
    }

    pub(crate) fn accept(
        &mut self,
        index: usize,
        seq: Sequence,
        mut command: Command,
    ) -> AcceptReply {
        let slot = self.slot_mut(index);
        let mut okay = seq.round >= slot.promise.round;
        if okay && slot.decided {
            okay = slot
                .command
                .as_ref()
                .map_or(false, |decided| decided.same_request(&command));
        }
        if okay {
            debug!("[{}] accept: accepting {} with {}", index, seq, command);
            slot.promise = seq.clone();
            if !slot.decided {
                command.accepted_under = seq.clone();
                slot.command = Some(command);
            }
            AcceptReply { okay, promise: seq }
        } else {
            debug!("[{}] accept: rejecting {} with {}", index, seq, command);
            AcceptReply {
                okay,
                promise: slot.promise.clone(),
            }
        }
    }

    pub(crate) fn decide(&mut self, index: usize, command: Command) {
        let slot = self.slot_mut(index);
        if slot.decided {
            match &slot.command {
                Some(decided) if decided.same_request(&command) => return,
                decided => {
                    error!(
                        "[{}] decide: {} arrived but {:?} is decided",
                        index, command, decided
                    );
                    panic!("[{}] decision contradiction", index);
                }
            }
        }
        info!("[{}] decided {} under {}", index, command, command.accepted_under);
        if command.accepted_under.round > slot.promise.round {
            slot.promise = command.accepted_under.clone();
        }
        slot.command = Some(command);
        slot.decided = true;
        self.apply_ready();
    }

    /// Apply decided slots in order, stopping at the first gap.
    fn apply_ready(&mut self) {
        while let Some(slot) = self.slots.get(self.applied) {
            let command = match (slot.decided, &slot.command) {
                (true, Some(command)) => command.clone(),
                _ => break,
            };
            let result = self.store.apply(&command.text);
            info!("[{}] applied {}: {}", self.applied, command, result);
            if command.origin == self.id {
                if let Some(tx) = self.pending.remove(&command.tag) {
                    if tx.send(result).is_err() {
                        debug!("waiter for tag {} went away", command.tag);
                    }
                }
            }
            self.applied += 1;
        }
    }
}

/// Read-only snapshot of a replica, see [`Replica::dump`].
#[derive(Clone, Debug)]
pub struct Dump {
    /// Replica identity.
    pub id: ReplicaId,
    /// Cluster members.
    pub cluster: Vec<ReplicaId>,
    /// First slot not yet applied to the store.
    pub next_unapplied: usize,
    /// The whole slot table.
    pub slots: Vec<Slot>,
    /// The applied store.
    pub database: BTreeMap<String, String>,
}

impl fmt::Display for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dump of replica {}", self.id)?;
        writeln!(f, "Cell: {:?}", self.cluster)?;
        writeln!(f, "Next unapplied slot: {}", self.next_unapplied)?;
        writeln!(f, "Slots:")?;
        for slot in self.slots.iter() {
            writeln!(f, "\t{}", slot)?;
        }
        writeln!(f, "Database:")?;
        for (k, v) in self.database.iter() {
            writeln!(f, "\t[{}] => [{}]", k, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn replica() -> Replica {
        let cluster = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        Replica::new("a", cluster, Config::default())
    }

    fn decided(text: &str, tag: u64) -> Command {
        let mut c = Command::new(text, "b", tag);
        c.accepted_under = Sequence::new(1, "b");
        c
    }

    #[test]
    fn test_prepare_requires_higher_round() {
        let r = replica();
        let reply = r.prepare(2, Sequence::new(1, "a"));
        assert!(reply.okay);
        assert_eq!(reply.promise, Sequence::new(1, "a"));
        assert!(reply.command.is_none());
        assert_eq!(r.dump().slots.len(), 3);

        // Equal round from another proposer is refused.
        let reply = r.prepare(2, Sequence::new(1, "b"));
        assert!(!reply.okay);
        assert_eq!(reply.promise, Sequence::new(1, "a"));

        let reply = r.prepare(2, Sequence::new(0, "b"));
        assert!(!reply.okay);
        assert!(r.prepare(2, Sequence::new(5, "b")).okay);
        assert_eq!(r.dump().slots[2].promise.round, 5);
    }

    #[test]
    fn test_accept_gating() {
        let r = replica();
        assert!(r.prepare(0, Sequence::new(3, "b")).okay);

        let reply = r.accept(0, Sequence::new(2, "a"), Command::new("put x 1", "a", 1));
        assert!(!reply.okay);
        assert_eq!(reply.promise.round, 3);
        assert!(r.dump().slots[0].command.is_none());

        let reply = r.accept(0, Sequence::new(3, "b"), Command::new("put x 2", "b", 1));
        assert!(reply.okay);
        let slot = &r.dump().slots[0];
        let accepted = slot.command.as_ref().unwrap();
        assert_eq!(accepted.text, "put x 2");
        assert_eq!(accepted.accepted_under, Sequence::new(3, "b"));

        // A later prepare learns of the accepted command.
        let reply = r.prepare(0, Sequence::new(4, "a"));
        assert!(reply.okay);
        assert_eq!(reply.command.unwrap().accepted_under.round, 3);
    }

    #[test]
    fn test_promise_never_decreases() {
        let r = replica();
        let mut last = 0;
        let rounds = [2, 1, 4, 4, 3, 7, 0, 6];
        for (i, round) in rounds.iter().enumerate() {
            if i % 2 == 0 {
                r.prepare(0, Sequence::new(*round, "a"));
            } else {
                r.accept(0, Sequence::new(*round, "b"), Command::new("get x", "b", i as u64));
            }
            let promised = r.dump().slots[0].promise.round;
            assert!(promised >= last);
            last = promised;
        }
        assert_eq!(last, 7);
    }

    #[test]
    fn test_decide_applies_in_slot_order() {
        let r = replica();
        r.decide(0, decided("put x 1", 0));
        assert_eq!(r.dump().database.get("x").map(String::as_str), Some("1"));

        // Slot 2 waits for slot 1.
        r.decide(2, decided("put x 3", 2));
        let dump = r.dump();
        assert!(dump.slots[2].decided);
        assert_eq!(dump.next_unapplied, 1);
        assert_eq!(dump.database.get("x").map(String::as_str), Some("1"));

        r.decide(1, decided("put x 2", 1));
        let dump = r.dump();
        assert_eq!(dump.next_unapplied, 3);
        assert_eq!(dump.database.get("x").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_out_of_order_decide_waits_for_gap() {
        let r = replica();
        for i in 0..4 {
            r.decide(i, decided(&format!("put k{} v{}", i, i), i as u64));
        }
        r.decide(5, decided("delete k0", 5));
        let dump = r.dump();
        assert!(dump.slots[5].decided);
        assert_eq!(dump.next_unapplied, 4);
        assert!(dump.database.contains_key("k0"));
        assert!(!dump.database.contains_key("late"));

        r.decide(4, decided("put late 4", 4));
        let dump = r.dump();
        assert_eq!(dump.next_unapplied, 6);
        assert!(!dump.database.contains_key("k0"));
        assert_eq!(dump.database.get("late").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_decide_is_idempotent() {
        let r = replica();
        r.decide(0, decided("put x 1", 0));
        r.decide(0, decided("put x 1", 0));
        r.decide(1, decided("delete x", 1));
        r.decide(0, decided("put x 1", 0));
        assert!(r.dump().database.is_empty());
        assert_eq!(r.dump().next_unapplied, 2);
    }

    #[test]
    fn test_accept_never_rewrites_decision() {
        let r = replica();
        r.decide(0, decided("put x 1", 0));
        let reply = r.accept(0, Sequence::new(9, "c"), Command::new("put x 2", "c", 1));
        assert!(!reply.okay);
        assert!(r.accept(0, Sequence::new(9, "c"), decided("put x 1", 0)).okay);
        assert_eq!(r.decision(0).unwrap().text, "put x 1");
    }

    #[test]
    #[should_panic(expected = "decision contradiction")]
    fn test_contradiction_panics() {
        let r = replica();
        r.decide(0, decided("put x 1", 0));
        r.decide(0, decided("put x 2", 1));
    }

    #[test]
    fn test_contradiction_halts_replica() {
        let r = Arc::new(replica());
        r.decide(0, decided("put x 1", 0));
        let r2 = r.clone();
        let res = std::thread::spawn(move || r2.decide(0, decided("put x 2", 1))).join();
        assert!(res.is_err());
        assert!(r.state.is_poisoned());
        let r3 = r.clone();
        assert!(std::thread::spawn(move || r3.first_open_slot()).join().is_err());
    }

    #[test]
    fn test_pending_waiter_receives_own_result() {
        let r = replica();
        let mut rx = r.register_pending(7);
        // Same tag but issued elsewhere.
        r.decide(0, decided("put x 1", 7));
        assert!(rx.try_recv().is_err());

        let mut own = Command::new("get x", "a", 7);
        own.accepted_under = Sequence::new(1, "a");
        r.decide(1, own);
        assert_eq!(rx.try_recv().unwrap(), "get: [x] found [1]");
        assert!(r.lock().pending.is_empty());
    }

    #[test]
    fn test_first_open_slot() {
        let r = replica();
        assert_eq!(r.first_open_slot(), 0);
        r.decide(0, decided("put x 1", 0));
        assert_eq!(r.first_open_slot(), 1);
        r.prepare(3, Sequence::new(1, "b"));
        assert_eq!(r.first_open_slot(), 1);
        r.accept(1, Sequence::new(1, "b"), Command::new("get x", "b", 1));
        r.decide(2, decided("get x", 2));
        assert_eq!(r.first_open_slot(), 3);
        assert_eq!(r.decision(2).unwrap().text, "get x");
        assert!(r.decision(1).is_none());
        assert!(r.decision(10).is_none());
    }
}
