//! Command message envelope.

use chrono::{DateTime, Utc};
use common::{AggregateId, Header, generate_global_id};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Command;
use crate::error::{ModelingError, Result};

/// A command addressed to one aggregate.
///
/// `request_id` is supplied by the caller and drives idempotency; it
/// defaults to the message id. `version`, when present, is the aggregate
/// version the caller expects the command to run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: String,
    pub request_id: String,
    pub aggregate_id: AggregateId,
    pub name: String,
    pub version: Option<Version>,
    pub header: Header,
    pub body: serde_json::Value,
    pub is_create: bool,
    pub allow_create: bool,
    pub create_time: DateTime<Utc>,
}

impl CommandMessage {
    /// Wraps a typed command.
    pub fn of<C: Command>(aggregate_id: AggregateId, command: &C) -> Result<Self> {
        let id = generate_global_id();
        Ok(Self {
            request_id: id.clone(),
            id,
            aggregate_id,
            name: C::NAME.to_string(),
            version: None,
            header: Header::new(),
            body: serde_json::to_value(command)?,
            is_create: C::IS_CREATE,
            allow_create: C::ALLOW_CREATE,
            create_time: Utc::now(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_expected_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key, value);
        self
    }

    pub fn with_operator(self, operator: impl Into<String>) -> Self {
        self.with_header(Header::OPERATOR, operator)
    }

    /// Rejects malformed envelopes before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ModelingError::InvalidCommand("command id is empty".into()));
        }
        if self.request_id.is_empty() {
            return Err(ModelingError::InvalidCommand("request id is empty".into()));
        }
        if self.name.is_empty() {
            return Err(ModelingError::InvalidCommand("command name is empty".into()));
        }
        if self.aggregate_id.id().is_empty() {
            return Err(ModelingError::InvalidCommand("aggregate id is empty".into()));
        }
        if let Some(version) = self.version {
            if version.as_i64() < 0 {
                return Err(ModelingError::InvalidCommand(format!(
                    "expected version {version} is negative"
                )));
            }
        }
        Ok(())
    }
}
