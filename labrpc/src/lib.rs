//! In-process and TCP RPC plumbing for typed services declared with [`service!`].

pub mod client;
mod macros;
pub mod network;
pub mod server;
pub mod tcp;

pub use anyhow;
pub use async_trait::async_trait;
pub use futures;
pub use log;
pub use rand;
pub use serde;
pub use serde_json;
pub use tokio;

pub use network::{Network, NetworkControl};
