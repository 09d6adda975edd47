use futures::future::BoxFuture;
use labrpc::{anyhow::Result, log::debug};
use tokio::sync::mpsc;

use crate::Sequence;

/// One acceptor's answer to a Prepare or Accept request.
pub(crate) struct Vote<T> {
    pub okay: bool,
    pub promise: Sequence,
    pub payload: T,
}

/// Outcome of one round of requests.
pub(crate) struct Tally<T> {
    /// A majority voted yes.
    pub won: bool,
    /// Payloads of the yes votes counted before the round closed.
    pub yes: Vec<T>,
    /// Highest promise round seen in any counted reply.
    pub highest_round: u64,
}

/// Run every call on its own task and count votes until either outcome
/// reaches `majority`. A failed call counts as a no. Calls still in flight
/// when the round closes run to completion and their replies are dropped.
pub(crate) async fn gather<T>(
    majority: usize,
    calls: Vec<BoxFuture<'static, Result<Vote<T>>>>,
) -> Tally<T>
where
    T: Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(calls.len().max(1));
    for call in calls {
        let tx = tx.clone();
        tokio::spawn(async move {
            // The receiver is gone once the round has closed.
            let _ = tx.send(call.await).await;
        });
    }
    drop(tx);

    let mut tally = Tally {
        won: false,
        yes: Vec::new(),
        highest_round: 0,
    };
    let mut no = 0;
    while let Some(vote) = rx.recv().await {
        match vote {
            Ok(vote) => {
                tally.highest_round = tally.highest_round.max(vote.promise.round);
                if vote.okay {
                    tally.yes.push(vote.payload);
                } else {
                    no += 1;
                }
            }
            Err(e) => {
                debug!("counting failed call as a 'no' vote: {}", e);
                no += 1;
            }
        }
        if tally.yes.len() >= majority {
            tally.won = true;
            break;
        }
        if no >= majority {
            break;
        }
    }
    debug!("round closed with {} yes, {} no", tally.yes.len(), no);
    tally
}
