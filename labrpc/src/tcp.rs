//! Carry [`NetworkPackage`]s between processes over TCP.
//!
//! Every call opens its own connection to the `host:port` named by the package,
//! writes the request as one line of JSON and reads one line back.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::{pin_mut, stream, Future, Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Sender};

use crate::{client::Client, network::NetworkPackage, server::Server};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Route packages to remote servers. Clients built from the returned sender
/// address servers by `host:port`; the returned routine must be spawned.
pub fn connector() -> (Sender<NetworkPackage>, impl Future<Output = ()>) {
    let (tx, mut rx) = mpsc::channel::<NetworkPackage>(100);
    (tx, async move {
        while let Some(p) = rx.recv().await {
            tokio::spawn(async move {
                let to = p.to.clone();
                if let Err(e) = forward(p).await {
                    debug!("call to {} failed: {}", to, e);
                }
            });
        }
    })
}

/// A client stub for the server listening on `addr`.
pub fn client<C: Client>(addr: String, connector: &Sender<NetworkPackage>) -> C {
    C::from_server(addr, connector.clone())
}

async fn forward(p: NetworkPackage) -> Result<()> {
    let stream = TcpStream::connect(&p.to).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(p.data.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    let mut lines = BufReader::new(reader).lines();
    match lines.next_line().await? {
        Some(resp) => {
            p.reply.send(resp).await?;
            Ok(())
        }
        None => Err(anyhow!("connection closed without a response")),
    }
}

/// Accept connections on `listener` and feed their requests to `server`.
pub async fn serve<S>(listener: TcpListener, server: S) -> Result<()>
where
    S: Server + Send + 'static,
{
    let to = listener.local_addr()?.to_string();
    info!("listening on {}", to);
    let incoming = stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    });
    serve_incoming(to, incoming, server).await
}

/// Feed requests arriving on `incoming` connections to `server`. A failed
/// accept is logged and skipped, so running out of file descriptors only
/// stalls the server until some are released.
async fn serve_incoming<S, I>(to: String, incoming: I, mut server: S) -> Result<()>
where
    S: Server + Send + 'static,
    I: Stream<Item = io::Result<(TcpStream, SocketAddr)>>,
{
    let server_tx = server.client_chan();
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("server stopped: {}", e);
        }
    });
    pin_mut!(incoming);
    while let Some(accepted) = incoming.next().await {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("error accepting connection on {}: {}", to, e);
                tokio::time::sleep(ACCEPT_RETRY).await;
                continue;
            }
        };
        trace!("connection from {}", peer);
        let server_tx = server_tx.clone();
        let to = to.clone();
        tokio::spawn(async move {
            if let Err(e) = respond(stream, to, server_tx).await {
                debug!("connection from {} failed: {}", peer, e);
            }
        });
    }
    Ok(())
}

async fn respond(stream: TcpStream, to: String, server_tx: Sender<NetworkPackage>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(data) = lines.next_line().await? {
        let (reply, mut rx) = mpsc::channel(1);
        server_tx
            .send(NetworkPackage {
                to: to.clone(),
                reply,
                data,
            })
            .await?;
        let resp = rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("server dropped the request"))?;
        writer.write_all(resp.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    crate::service! {
        service adder_svc {
            fn add(a: i64, b: i64) -> i64;
        }
    }

    struct Adder;

    #[crate::async_trait]
    impl adder_svc::Service for Adder {
        async fn add(&self, a: i64, b: i64) -> Result<i64> {
            Ok(a + b)
        }
    }

    #[tokio::test]
    async fn test_call_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = adder_svc::Server::<Adder>::from_service(Arc::new(Adder));
        tokio::spawn(serve(listener, server));

        let (tx, routine) = connector();
        tokio::spawn(routine);
        let c: adder_svc::Client = client(addr, &tx);
        assert_eq!(c.add(40, 2).await.unwrap(), 42);
        assert_eq!(c.add(-1, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_accept_error_keeps_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // The first accepts fail as they do once the process runs out of
        // file descriptors.
        let failures: Vec<_> = (0..2)
            .map(|_| Err(io::Error::new(io::ErrorKind::Other, "too many open files")))
            .collect();
        let accepts = stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });
        let incoming = stream::iter(failures).chain(accepts);
        let server = adder_svc::Server::<Adder>::from_service(Arc::new(Adder));
        let serving = tokio::spawn(serve_incoming(addr.clone(), incoming, server));

        let (tx, routine) = connector();
        tokio::spawn(routine);
        let c: adder_svc::Client = client(addr, &tx);
        assert_eq!(c.add(2, 3).await.unwrap(), 5);
        assert!(!serving.is_finished());
    }

    #[tokio::test]
    async fn test_unreachable_is_error() {
        let (tx, routine) = connector();
        tokio::spawn(routine);
        let c: adder_svc::Client = client("127.0.0.1:1".into(), &tx);
        assert!(c.add(1, 1).await.is_err());
    }
}
