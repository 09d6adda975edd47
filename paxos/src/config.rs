use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a replica and its proposer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Simulated processing latency. Acceptor handlers sleep between one and
    /// two times this long both before and after their critical section.
    pub handler_delay: Duration,
    /// After its n-th failed round a proposer sleeps between `5n` and `10n`
    /// of these.
    pub backoff_unit: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_delay: Duration::from_millis(0),
            backoff_unit: Duration::from_millis(10),
        }
    }
}
