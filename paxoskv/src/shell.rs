use std::sync::Arc;

use log::warn;

use crate::kv::Paxoskv;

/// Commands of the shell with their usage.
const COMMANDS: &[(&str, &str)] = &[
    ("get", "get <key>"),
    ("put", "put <key> <value>"),
    ("delete", "delete <key>"),
    ("dump", "dump"),
    ("help", "help"),
    ("quit", "quit"),
];

/// What the caller should do after a line was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Print this.
    Output(String),
    /// Stop reading input.
    Quit,
    /// Blank line, nothing to do.
    Nothing,
}

/// Line-oriented front end of a [`Paxoskv`] node.
pub struct Shell {
    node: Arc<Paxoskv>,
}

impl Shell {
    /// A shell driving `node`.
    pub fn new(node: Arc<Paxoskv>) -> Self {
        Self { node }
    }

    /// Handle one line of input. Only well-formed `get`, `put` and `delete`
    /// lines are replicated.
    pub async fn execute(&self, line: &str) -> Reply {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = match fields.split_first() {
            Some((name, args)) => (*name, args),
            None => return Reply::Nothing,
        };
        let expected = match name {
            "get" | "delete" => 1,
            "put" => 2,
            "dump" | "help" | "quit" => 0,
            _ => return Reply::Output(format!("[{}] command not recognized, try 'help'", name)),
        };
        if args.len() != expected {
            let usage = COMMANDS
                .iter()
                .find(|(n, _)| *n == name)
                .map_or(name, |&(_, usage)| usage);
            return Reply::Output(format!("usage: {}", usage));
        }
        match name {
            "quit" => Reply::Quit,
            "help" => {
                let mut out = String::from("List of commands:");
                for (_, usage) in COMMANDS {
                    out.push_str("\n  ");
                    out.push_str(usage);
                }
                Reply::Output(out)
            }
            "dump" => Reply::Output(self.node.dump().to_string()),
            _ => match self.node.execute(fields.join(" ")).await {
                Ok(result) => Reply::Output(result),
                Err(e) => {
                    warn!("{}", e);
                    Reply::Output(format!("error: {}", e))
                }
            },
        }
    }
}
