use std::sync::Arc;

use futures::FutureExt;
use labrpc::log::{debug, info, warn};
use rand::Rng;
use tokio::sync::oneshot;

use crate::quorum::{self, Tally, Vote};
use crate::{AcceptorClient, Command, Replica, Sequence};

/// Drives client commands into the log of a cluster.
///
/// Holds no lock of its own: any number of proposals may run at once, on this
/// replica or others, and the acceptors' promises keep them apart.
#[derive(Debug, Clone)]
pub struct Proposer {
    replica: Arc<Replica>,
    acceptors: Vec<AcceptorClient>,
}

impl Proposer {
    /// A proposer for `replica`, reaching every cluster member (the replica
    /// itself included) through `acceptors`.
    pub fn new(replica: Arc<Replica>, acceptors: Vec<AcceptorClient>) -> Self {
        Self { replica, acceptors }
    }

    /// The replica this proposer belongs to.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Propose `text` in the background. The receiver yields the outcome once
    /// the request is applied at this replica.
    pub fn submit(&self, text: impl Into<String>, tag: u64) -> oneshot::Receiver<String> {
        let command = Command::new(text, self.replica.id(), tag);
        let rx = self.replica.register_pending(tag);
        let proposer = self.clone();
        tokio::spawn(async move {
            proposer.propose(command).await;
        });
        rx
    }

    /// Get `command` decided in some slot and return that slot.
    ///
    /// Retries until it succeeds, so it never returns while no majority of the
    /// cluster is reachable.
    pub async fn propose(&self, command: Command) -> usize {
        let id = self.replica.id().to_owned();
        let majority = self.replica.majority();
        let mut slot = self.replica.first_open_slot();
        let mut round = 1;
        let mut failures: u32 = 0;

        loop {
            if failures > 0 {
                let mut advanced = false;
                while let Some(decided) = self.replica.decision(slot) {
                    if decided.same_request(&command) {
                        info!("[{}] propose: {} already decided here", slot, command);
                        return slot;
                    }
                    slot += 1;
                    advanced = true;
                }
                if advanced {
                    debug!("[{}] propose: earlier slot taken, moving on", slot);
                    round = 1;
                }
            }

            let seq = Sequence::new(round, id.clone());
            debug!("[{}] propose: prepare with {} for {}", slot, seq, command);
            let prepare = self.prepare_round(slot, &seq, majority).await;
            let mut highest = prepare.highest_round.max(round);

            if prepare.won {
                let chosen = Self::adopt(prepare).unwrap_or_else(|| command.clone());
                if !chosen.same_request(&command) {
                    info!(
                        "[{}] propose: adopting {} accepted under {}",
                        slot, chosen, chosen.accepted_under
                    );
                }

                let accept = self.accept_round(slot, &seq, &chosen, majority).await;
                highest = highest.max(accept.highest_round);
                if accept.won {
                    let mut decided = chosen;
                    decided.accepted_under = seq;
                    info!("[{}] propose: deciding {}", slot, decided);
                    self.broadcast_decide(slot, decided.clone());
                    if decided.same_request(&command) {
                        return slot;
                    }
                    // Our own command still needs a slot.
                    slot += 1;
                    round = 1;
                    continue;
                }
            }

            failures += 1;
            let unit = self.replica.config().backoff_unit;
            let pause = unit * rand::thread_rng().gen_range(5 * failures..=10 * failures);
            debug!("[{}] propose: round {} failed, sleeping {:?}", slot, round, pause);
            tokio::time::sleep(pause).await;
            round = highest + 1;
        }
    }

    /// The command accepted under the highest round among the grants, if any.
    fn adopt(prepare: Tally<Option<Command>>) -> Option<Command> {
        prepare
            .yes
            .into_iter()
            .flatten()
            .filter(|c| c.accepted_under.round > 0)
            .max_by_key(|c| c.accepted_under.round)
    }

    async fn prepare_round(
        &self,
        slot: usize,
        seq: &Sequence,
        majority: usize,
    ) -> Tally<Option<Command>> {
        let calls = self
            .acceptors
            .iter()
            .map(|c| {
                let c = c.clone();
                let seq = seq.clone();
                async move {
                    c.prepare(slot, seq).await.map(|reply| Vote {
                        okay: reply.okay,
                        promise: reply.promise,
                        payload: reply.command,
                    })
                }
                .boxed()
            })
            .collect();
        quorum::gather(majority, calls).await
    }

    async fn accept_round(
        &self,
        slot: usize,
        seq: &Sequence,
        command: &Command,
        majority: usize,
    ) -> Tally<()> {
        let calls = self
            .acceptors
            .iter()
            .map(|c| {
                let c = c.clone();
                let seq = seq.clone();
                let command = command.clone();
                async move {
                    c.accept(slot, seq, command).await.map(|reply| Vote {
                        okay: reply.okay,
                        promise: reply.promise,
                        payload: (),
                    })
                }
                .boxed()
            })
            .collect();
        quorum::gather(majority, calls).await
    }

    /// Tell every member about the decision without waiting for them.
    fn broadcast_decide(&self, slot: usize, command: Command) {
        for c in self.acceptors.iter() {
            let c = c.clone();
            let command = command.clone();
            tokio::spawn(async move {
                if let Err(e) = c.decide(slot, command).await {
                    warn!("[{}] decide to {} failed: {}", slot, c.server_id(), e);
                }
            });
        }
    }
}
