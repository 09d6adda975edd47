use std::sync::Arc;
use std::time::Duration;

use log::info;
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

use paxos::Config;
use paxoskv::{Paxoskv, Reply, Shell};

#[derive(StructOpt, Debug)]
#[structopt(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Opt {
    /// Port this replica listens on
    #[structopt(short, long)]
    port: u16,

    /// Address this replica binds and is known by
    #[structopt(long, default_value = "127.0.0.1")]
    host: String,

    /// Cluster members, as ports on --host or as host:port
    #[structopt(name = "MEMBER")]
    members: Vec<String>,

    /// Simulated latency of acceptor handlers in milliseconds
    #[structopt(long, default_value = "0")]
    delay_ms: u64,

    /// Backoff unit of the proposer in milliseconds
    #[structopt(long, default_value = "10")]
    backoff_ms: u64,
}

impl Opt {
    fn members(&self) -> Vec<String> {
        let mut members: Vec<String> = self
            .members
            .iter()
            .map(|m| {
                if m.contains(':') {
                    m.clone()
                } else {
                    format!("{}:{}", self.host, m)
                }
            })
            .collect();
        let me = format!("{}:{}", self.host, self.port);
        if !members.contains(&me) {
            members.push(me);
        }
        members
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let opt = Opt::from_args();
    let config = Config {
        handler_delay: Duration::from_millis(opt.delay_ms),
        backoff_unit: Duration::from_millis(opt.backoff_ms),
    };
    let node = Paxoskv::launch(&opt.host, opt.port, opt.members(), config).await?;
    let shell = Shell::new(Arc::new(node));

    info!("type 'help' for list of commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match shell.execute(&line).await {
            Reply::Output(out) => println!("{}", out),
            Reply::Quit => break,
            Reply::Nothing => {}
        }
    }
    println!("Goodbye!");
    Ok(())
}
