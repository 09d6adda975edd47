use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A command understood by the key-value store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Read `key`.
    Get {
        /// Key to read.
        key: String,
    },
    /// Set `key` to `value`.
    Put {
        /// Key to set.
        key: String,
        /// New value.
        value: String,
    },
    /// Remove `key`.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl Operation {
    /// Parse whitespace-separated command text. Returns `None` for anything
    /// other than `get <k>`, `put <k> <v>` and `delete <k>`.
    pub fn parse(text: &str) -> Option<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        match fields.as_slice() {
            ["get", key] => Some(Operation::Get {
                key: (*key).to_owned(),
            }),
            ["put", key, value] => Some(Operation::Put {
                key: (*key).to_owned(),
                value: (*value).to_owned(),
            }),
            ["delete", key] => Some(Operation::Delete {
                key: (*key).to_owned(),
            }),
            _ => None,
        }
    }

    /// The command text this operation parses from.
    pub fn to_text(&self) -> String {
        match self {
            Operation::Get { key } => format!("get {}", key),
            Operation::Put { key, value } => format!("put {} {}", key, value),
            Operation::Delete { key } => format!("delete {}", key),
        }
    }
}

/// The replicated state machine: a map from string keys to string values.
#[derive(Clone, Default, Debug)]
pub struct Store {
    data: BTreeMap<String, String>,
}

impl Store {
    /// Execute command text and describe the outcome. Text which is not an
    /// [`Operation`] leaves the store untouched.
    pub fn apply(&mut self, text: &str) -> String {
        match Operation::parse(text) {
            Some(Operation::Put { key, value }) => {
                let resp = format!("put: [{}] set to [{}]", key, value);
                self.data.insert(key, value);
                resp
            }
            Some(Operation::Get { key }) => match self.data.get(&key) {
                Some(value) => format!("get: [{}] found [{}]", key, value),
                None => format!("get: [{}] not found", key),
            },
            Some(Operation::Delete { key }) => match self.data.remove(&key) {
                Some(value) => format!("delete: [{}] => [{}] deleted", key, value),
                None => format!("delete: [{}] not found", key),
            },
            None => format!("ignored: {}", text),
        }
    }

    /// Value currently bound to `key`.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }

    /// All bindings in key order.
    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}
