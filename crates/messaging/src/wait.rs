//! Command stage signals and the wait protocol.
//!
//! A caller that wants to observe a command registers a pending wait keyed
//! by command id, then tags the command header with the address of its
//! process ([`Header::WAIT_ENDPOINT`]) and the awaited stage
//! ([`Header::WAIT_STAGE`]). Whoever reaches a stage sends a [`WaitSignal`]
//! to that address through a [`WaitNotificationChannel`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, ErrorInfo, FunctionInfo, Header, error_codes, generate_global_id};
use event_store::Version;
use modeling::CommandMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};

use crate::error::Result;

/// A point in a command's lifecycle.
///
/// `Snapshot` and `Projected` both follow `Processed` and are unordered
/// with respect to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStage {
    Sent,
    Processed,
    Snapshot,
    Projected,
}

impl CommandStage {
    fn rank(self) -> u8 {
        match self {
            CommandStage::Sent => 0,
            CommandStage::Processed => 1,
            CommandStage::Snapshot | CommandStage::Projected => 2,
        }
    }

    /// Whether `self` strictly precedes `other`.
    pub fn is_previous_of(self, other: CommandStage) -> bool {
        self.rank() < other.rank()
    }

    /// Whether a waiter for `self` cares about a signal from `processing`.
    pub fn should_notify(self, processing: CommandStage) -> bool {
        self == processing || processing.is_previous_of(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStage::Sent => "SENT",
            CommandStage::Processed => "PROCESSED",
            CommandStage::Snapshot => "SNAPSHOT",
            CommandStage::Projected => "PROJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SENT" => Some(CommandStage::Sent),
            "PROCESSED" => Some(CommandStage::Processed),
            "SNAPSHOT" => Some(CommandStage::Snapshot),
            "PROJECTED" => Some(CommandStage::Projected),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report that a command reached a stage, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSignal {
    pub id: String,
    pub command_id: String,
    pub aggregate_id: AggregateId,
    pub stage: CommandStage,
    pub aggregate_version: Option<Version>,
    pub function: FunctionInfo,
    pub error_code: String,
    pub error_msg: String,
    pub signal_time: DateTime<Utc>,
}

impl WaitSignal {
    pub fn new(
        command_id: impl Into<String>,
        aggregate_id: AggregateId,
        stage: CommandStage,
        function: FunctionInfo,
    ) -> Self {
        let ok = ErrorInfo::ok();
        Self {
            id: generate_global_id(),
            command_id: command_id.into(),
            aggregate_id,
            stage,
            aggregate_version: None,
            function,
            error_code: ok.error_code,
            error_msg: ok.error_msg,
            signal_time: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.aggregate_version = Some(version);
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error_code = error.error_code;
        self.error_msg = error.error_msg;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error_code == error_codes::SUCCEEDED
    }
}

/// What a gateway caller gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    pub stage: CommandStage,
    pub aggregate_id: AggregateId,
    pub aggregate_version: Option<Version>,
    pub request_id: String,
    pub command_id: String,
    pub function: FunctionInfo,
    pub error_code: String,
    pub error_msg: String,
    pub signal_time: DateTime<Utc>,
}

impl CommandResult {
    pub fn from_signal(signal: WaitSignal, message: &CommandMessage) -> Self {
        Self {
            id: signal.id,
            stage: signal.stage,
            aggregate_id: signal.aggregate_id,
            aggregate_version: signal.aggregate_version,
            request_id: message.request_id.clone(),
            command_id: signal.command_id,
            function: signal.function,
            error_code: signal.error_code,
            error_msg: signal.error_msg,
            signal_time: signal.signal_time,
        }
    }

    /// Result of a command that was handed to the bus.
    pub fn sent(message: &CommandMessage) -> Self {
        Self::from_signal(
            WaitSignal::new(
                message.id.clone(),
                message.aggregate_id.clone(),
                CommandStage::Sent,
                gateway_function(),
            ),
            message,
        )
    }

    /// Result of a command rejected as a duplicate request.
    pub fn duplicate(message: &CommandMessage) -> Self {
        let mut result = Self::sent(message);
        result.error_code = error_codes::COMMAND_DUPLICATE.to_string();
        result.error_msg = format!("Duplicate request id {}", message.request_id);
        result
    }

    pub fn succeeded(&self) -> bool {
        self.error_code == error_codes::SUCCEEDED
    }
}

pub(crate) fn gateway_function() -> FunctionInfo {
    FunctionInfo::new("CommandGateway", "send")
}

/// A registered wait.
#[derive(Debug)]
pub struct WaitingFor {
    pub stage: CommandStage,
    sender: oneshot::Sender<WaitSignal>,
}

impl WaitingFor {
    /// Whether `signal` ends this wait: the awaited stage or one that
    /// follows it, or a failure at a stage that precedes it.
    pub fn completes_with(&self, signal: &WaitSignal) -> bool {
        signal.stage == self.stage
            || self.stage.is_previous_of(signal.stage)
            || (!signal.succeeded() && signal.stage.is_previous_of(self.stage))
    }
}

/// Pending waits of this process, keyed by command id.
#[derive(Debug, Default)]
pub struct WaitStrategyRegistrar {
    waiting: Mutex<HashMap<String, WaitingFor>>,
}

impl WaitStrategyRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wait, replacing any previous wait for the same command.
    pub async fn register(
        &self,
        command_id: impl Into<String>,
        stage: CommandStage,
    ) -> oneshot::Receiver<WaitSignal> {
        let (sender, receiver) = oneshot::channel();
        self.waiting
            .lock()
            .await
            .insert(command_id.into(), WaitingFor { stage, sender });
        receiver
    }

    pub async fn unregister(&self, command_id: &str) -> bool {
        self.waiting.lock().await.remove(command_id).is_some()
    }

    pub async fn contains(&self, command_id: &str) -> bool {
        self.waiting.lock().await.contains_key(command_id)
    }

    pub async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }

    /// Completes the matching wait. Returns `false` when nobody waits for
    /// the command or the signal does not end the wait.
    pub async fn notify(&self, signal: WaitSignal) -> bool {
        let mut waiting = self.waiting.lock().await;
        let completes = waiting
            .get(&signal.command_id)
            .is_some_and(|w| w.completes_with(&signal));
        if !completes {
            return false;
        }
        match waiting.remove(&signal.command_id) {
            Some(wait) => wait.sender.send(signal).is_ok(),
            None => false,
        }
    }
}

/// Delivers signals to the process that waits for them.
#[async_trait]
pub trait WaitNotificationChannel: Send + Sync {
    async fn propagate(&self, endpoint: &str, signal: WaitSignal) -> Result<()>;
}

/// Delivers signals to a registrar in this process.
pub struct LocalWaitNotificationChannel {
    registrar: Arc<WaitStrategyRegistrar>,
}

impl LocalWaitNotificationChannel {
    pub fn new(registrar: Arc<WaitStrategyRegistrar>) -> Self {
        Self { registrar }
    }
}

#[async_trait]
impl WaitNotificationChannel for LocalWaitNotificationChannel {
    async fn propagate(&self, _endpoint: &str, signal: WaitSignal) -> Result<()> {
        self.registrar.notify(signal).await;
        Ok(())
    }
}

/// Posts signals as JSON to the endpoint URL.
#[derive(Clone, Default)]
pub struct HttpWaitNotificationChannel {
    client: reqwest::Client,
}

impl HttpWaitNotificationChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WaitNotificationChannel for HttpWaitNotificationChannel {
    async fn propagate(&self, endpoint: &str, signal: WaitSignal) -> Result<()> {
        self.client
            .post(endpoint)
            .json(&signal)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sends signals for this process's own endpoint locally, all others over
/// the remote channel.
pub struct RoutingWaitNotificationChannel {
    local_endpoint: String,
    local: Arc<dyn WaitNotificationChannel>,
    remote: Arc<dyn WaitNotificationChannel>,
}

impl RoutingWaitNotificationChannel {
    pub fn new(
        local_endpoint: impl Into<String>,
        local: Arc<dyn WaitNotificationChannel>,
        remote: Arc<dyn WaitNotificationChannel>,
    ) -> Self {
        Self {
            local_endpoint: local_endpoint.into(),
            local,
            remote,
        }
    }
}

#[async_trait]
impl WaitNotificationChannel for RoutingWaitNotificationChannel {
    async fn propagate(&self, endpoint: &str, signal: WaitSignal) -> Result<()> {
        if endpoint == self.local_endpoint {
            self.local.propagate(endpoint, signal).await
        } else {
            self.remote.propagate(endpoint, signal).await
        }
    }
}

/// Sends stage signals for commands whose header asks for them.
#[derive(Clone)]
pub struct CommandWaitNotifier {
    channel: Arc<dyn WaitNotificationChannel>,
}

impl CommandWaitNotifier {
    pub fn new(channel: Arc<dyn WaitNotificationChannel>) -> Self {
        Self { channel }
    }

    /// Propagates `signal` if the header names a wait endpoint and the
    /// awaited stage cares about this signal. Delivery failures are logged.
    pub async fn notify(&self, header: &Header, signal: WaitSignal) {
        let Some(endpoint) = header.get(Header::WAIT_ENDPOINT) else {
            return;
        };
        let Some(awaited) = header.get(Header::WAIT_STAGE).and_then(CommandStage::parse) else {
            return;
        };
        if !awaited.should_notify(signal.stage) {
            return;
        }

        let stage = signal.stage;
        let command_id = signal.command_id.clone();
        if let Err(e) = self.channel.propagate(endpoint, signal).await {
            tracing::warn!(
                %command_id,
                %stage,
                endpoint,
                error = %e,
                "Failed to deliver wait signal"
            );
        }
    }
}
