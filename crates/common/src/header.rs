use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String key/value metadata attached to commands and carried over to the
/// event streams they produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, String>);

impl Header {
    /// Who issued the command.
    pub const OPERATOR: &'static str = "operator";
    /// Address the dispatching process sends stage signals to.
    pub const WAIT_ENDPOINT: &'static str = "wait.endpoint";
    /// Stage the originator is waiting for.
    pub const WAIT_STAGE: &'static str = "wait.stage";
    /// Set on retries driven by the compensation engine.
    pub const COMPENSATION_ID: &'static str = "compensation.id";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn operator(&self) -> &str {
        self.get(Self::OPERATOR).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
