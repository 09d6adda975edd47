use labrpc::{anyhow::Result, log::trace};
use rand::Rng;

use super::AcceptorService;
use crate::{AcceptReply, Command, PrepareReply, Replica, Sequence};

impl Replica {
    /// Sleep between one and two times the configured handler delay.
    async fn simulate_latency(&self) {
        let delay = self.config().handler_delay;
        if delay.is_zero() {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        tokio::time::sleep(delay.mul_f64(1.0 + jitter)).await;
    }
}

#[labrpc::async_trait]
impl AcceptorService for Replica {
    async fn prepare(&self, slot: usize, seq: Sequence) -> Result<PrepareReply> {
        trace!("[{}] prepare: called with {}", slot, seq);
        self.simulate_latency().await;
        let reply = self.lock().prepare(slot, seq);
        self.simulate_latency().await;
        Ok(reply)
    }

    async fn accept(&self, slot: usize, seq: Sequence, command: Command) -> Result<AcceptReply> {
        trace!("[{}] accept: called with {} {}", slot, seq, command);
        self.simulate_latency().await;
        let reply = self.lock().accept(slot, seq, command);
        self.simulate_latency().await;
        Ok(reply)
    }

    async fn decide(&self, slot: usize, command: Command) -> Result<()> {
        trace!("[{}] decide: called with {}", slot, command);
        self.simulate_latency().await;
        self.lock().decide(slot, command);
        self.simulate_latency().await;
        Ok(())
    }
}
