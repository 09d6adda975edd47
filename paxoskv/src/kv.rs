use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use labrpc::{
    anyhow::{anyhow, Result},
    tcp,
};
use log::{error, info};
use paxos::{AcceptorClient, AcceptorServer, Config, Dump, Operation, Proposer, Replica};
use rand::Rng;
use tokio::net::TcpListener;

/// A replica of the store together with its proposer.
pub struct Paxoskv {
    proposer: Proposer,
    next_tag: AtomicU64,
}

impl Paxoskv {
    /// A node proposing through `proposer`.
    pub fn new(proposer: Proposer) -> Self {
        // Tags of an earlier run at the same address may still sit in peers' logs.
        let first_tag = u64::from(rand::thread_rng().gen::<u32>()) << 16;
        Self {
            proposer,
            next_tag: AtomicU64::new(first_tag),
        }
    }

    /// Serve the acceptor on `host:port` and reach the other `members`
    /// (`host:port` each, this replica included) over TCP.
    pub async fn launch(
        host: &str,
        port: u16,
        members: Vec<String>,
        config: Config,
    ) -> Result<Self> {
        let id = format!("{}:{}", host, port);
        if !members.contains(&id) {
            return Err(anyhow!("{} is not a member of {:?}", id, members));
        }
        let listener = TcpListener::bind(&id).await?;
        let replica = Arc::new(Replica::new(id.clone(), members.clone(), config));

        let server: AcceptorServer<Replica> = labrpc::server::Server::from_service(replica.clone());
        tokio::spawn(async move {
            if let Err(e) = tcp::serve(listener, server).await {
                error!("acceptor stopped: {}", e);
            }
        });

        let (connector, routine) = tcp::connector();
        tokio::spawn(routine);
        let acceptors: Vec<AcceptorClient> = members
            .into_iter()
            .map(|m| tcp::client(m, &connector))
            .collect();
        info!("replica {} of {:?} started", id, replica.cluster());
        Ok(Self::new(Proposer::new(replica, acceptors)))
    }

    /// The local replica.
    pub fn replica(&self) -> &Arc<Replica> {
        self.proposer.replica()
    }

    /// Replicate command text and wait until it is applied here.
    pub async fn execute(&self, text: String) -> Result<String> {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let rx = self.proposer.submit(text.clone(), tag);
        rx.await
            .map_err(|_| anyhow!("'{}' was abandoned before being applied", text))
    }

    /// Read `key` through the log.
    pub async fn get(&self, key: &str) -> Result<String> {
        self.execute(Operation::Get { key: key.to_owned() }.to_text())
            .await
    }

    /// Set `key` to `value`.
    pub async fn put(&self, key: &str, value: &str) -> Result<String> {
        self.execute(
            Operation::Put {
                key: key.to_owned(),
                value: value.to_owned(),
            }
            .to_text(),
        )
        .await
    }

    /// Remove `key`, reporting the value it held.
    pub async fn delete(&self, key: &str) -> Result<String> {
        self.execute(Operation::Delete { key: key.to_owned() }.to_text())
            .await
    }

    /// Snapshot of the local replica.
    pub fn dump(&self) -> Dump {
        self.replica().dump()
    }
}
