use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use futures::Future;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{client::Client, server::Server};

#[derive(Debug, Clone)]
pub struct NetworkPackage {
    pub to: String,
    pub reply: Sender<String>,
    pub data: String,
}

#[derive(Debug, Default)]
struct Faults {
    disconnected: HashSet<String>,
    loss: f64,
}

/// An in-process network routing packages to registered servers by id.
pub struct Network {
    pub tx: Sender<NetworkPackage>,
    rx: Receiver<NetworkPackage>,
    pub nodes: Arc<Mutex<HashMap<String, Sender<NetworkPackage>>>>,
    faults: Arc<Mutex<Faults>>,
}

/// Handle for injecting faults into a running [`Network`].
#[derive(Debug, Clone)]
pub struct NetworkControl {
    faults: Arc<Mutex<Faults>>,
}

impl NetworkControl {
    /// Drop every package addressed to `id` until it is reconnected.
    pub fn disconnect(&self, id: &str) {
        info!("disconnect {}", id);
        self.faults.lock().unwrap().disconnected.insert(id.to_owned());
    }

    pub fn reconnect(&self, id: &str) {
        info!("reconnect {}", id);
        self.faults.lock().unwrap().disconnected.remove(id);
    }

    /// Drop each package with probability `loss`.
    pub fn set_loss(&self, loss: f64) {
        self.faults.lock().unwrap().loss = loss;
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            tx,
            rx,
            nodes: Arc::new(Mutex::new(HashMap::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn control(&self) -> NetworkControl {
        NetworkControl {
            faults: self.faults.clone(),
        }
    }

    /// A client stub addressing the server registered as `id`.
    pub fn client<C: Client>(&self, id: String) -> C {
        C::from_server(id, self.tx.clone())
    }

    /// Register `svc` under `id`. The server is reachable as soon as this returns;
    /// the returned routine must be spawned to serve its requests.
    pub fn register_service<S, C>(
        &self,
        id: String,
        svc: Arc<S::Service>,
    ) -> (C, impl Future<Output = ()>)
    where
        S: Server + Send + 'static,
        C: Client,
    {
        let client = self.client(id.clone());
        let mut server = S::from_service(svc);
        self.nodes
            .lock()
            .unwrap()
            .insert(id.clone(), server.client_chan());
        (client, async move {
            if let Err(e) = server.run().await {
                info!("server {} stopped: {}", id, e);
            }
        })
    }

    pub async fn run(&mut self) {
        while let Some(p) = self.rx.recv().await {
            let dropped = {
                let faults = self.faults.lock().unwrap();
                faults.disconnected.contains(&p.to)
                    || (faults.loss > 0.0 && rand::thread_rng().gen_bool(faults.loss))
            };
            if dropped {
                debug!("package to {} dropped", p.to);
                continue;
            }

            let node = {
                let x = self.nodes.lock().unwrap();
                x.get(&p.to).cloned()
            };

            if let Some(x) = node {
                if x.send(p).await.is_err() {
                    warn!("send to node failed, dropped");
                }
            } else {
                warn!("node {} not found", p.to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::service! {
        service echo_svc {
            fn echo(x: String) -> String;
        }
    }

    struct Echo;

    #[crate::async_trait]
    impl echo_svc::Service for Echo {
        async fn echo(&self, x: String) -> anyhow::Result<String> {
            if x.is_empty() {
                anyhow::bail!("nothing to echo");
            }
            Ok(x)
        }
    }

    fn echo_network() -> (echo_svc::Client, NetworkControl) {
        let mut net = Network::new();
        let control = net.control();
        let (client, routine) = net.register_service::<echo_svc::Server<Echo>, echo_svc::Client>(
            "echo".into(),
            Arc::new(Echo),
        );
        tokio::spawn(routine);
        tokio::spawn(async move { net.run().await });
        (client, control)
    }

    #[tokio::test]
    async fn test_call_and_remote_error() {
        let (client, _) = echo_network();
        assert_eq!(client.echo("hi".into()).await.unwrap(), "hi");
        let err = client.echo(String::new()).await.unwrap_err();
        assert!(err.to_string().contains("nothing to echo"));
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let (client, control) = echo_network();
        control.disconnect("echo");
        assert!(client.echo("lost".into()).await.is_err());
        control.reconnect("echo");
        assert_eq!(client.echo("back".into()).await.unwrap(), "back");
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let mut net = Network::new();
        let client: echo_svc::Client = net.client("nobody".into());
        tokio::spawn(async move { net.run().await });
        assert!(client.echo("anyone".into()).await.is_err());
    }
}
