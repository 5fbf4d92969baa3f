//! Client-facing entry point for commands.

use std::sync::Arc;
use std::time::Duration;

use common::Header;
use modeling::CommandMessage;

use crate::bus::{CommandBus, MessageBus};
use crate::error::GatewayError;
use crate::idempotency::IdempotencyCheckerProvider;
use crate::wait::{CommandResult, CommandStage, WaitStrategyRegistrar};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Validates, deduplicates and sends commands, and optionally waits for
/// them to reach a stage.
///
/// Waiting is purely observational: a timeout drops the registration and
/// returns an error, the command itself keeps running.
pub struct CommandGateway {
    bus: Arc<dyn CommandBus>,
    idempotency: Arc<dyn IdempotencyCheckerProvider>,
    registrar: Arc<WaitStrategyRegistrar>,
    endpoint: String,
}

impl CommandGateway {
    /// `endpoint` is the address dispatchers send this process's wait
    /// signals to.
    pub fn new(
        bus: Arc<dyn CommandBus>,
        idempotency: Arc<dyn IdempotencyCheckerProvider>,
        registrar: Arc<WaitStrategyRegistrar>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            idempotency,
            registrar,
            endpoint: endpoint.into(),
        }
    }

    pub fn registrar(&self) -> &Arc<WaitStrategyRegistrar> {
        &self.registrar
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends without asking for any stage signal.
    #[tracing::instrument(skip(self, message), fields(command_id = %message.id))]
    /// Sends without waiting. A failed send still marks the request id as
    /// seen, see [`CommandGateway::check`].
    pub async fn send(&self, message: CommandMessage) -> Result<CommandResult> {
        if let Some(duplicate) = self.check(&message).await? {
            return Ok(duplicate);
        }
        let result = CommandResult::sent(&message);
        self.bus.send(message).await?;
        Ok(result)
    }

    pub async fn send_and_wait_for_sent(&self, message: CommandMessage) -> Result<CommandResult> {
        self.send_and_wait(message, CommandStage::Sent, Duration::ZERO)
            .await
    }

    pub async fn send_and_wait_for_processed(
        &self,
        message: CommandMessage,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.send_and_wait(message, CommandStage::Processed, timeout)
            .await
    }

    /// Sends the command and waits until it reaches `stage`, a later stage,
    /// or fails at an earlier one.
    ///
    /// Returns `Ok` with the failure's error code when the command failed,
    /// and [`GatewayError::WaitTimeout`] when no deciding signal arrives in
    /// time.
    #[tracing::instrument(skip(self, message), fields(command_id = %message.id, %stage))]
    pub async fn send_and_wait(
        &self,
        mut message: CommandMessage,
        stage: CommandStage,
        timeout: Duration,
    ) -> Result<CommandResult> {
        if let Some(duplicate) = self.check(&message).await? {
            return Ok(duplicate);
        }
        if stage == CommandStage::Sent {
            let result = CommandResult::sent(&message);
            self.bus.send(message).await?;
            return Ok(result);
        }

        message.header.insert(Header::WAIT_ENDPOINT, self.endpoint.clone());
        message.header.insert(Header::WAIT_STAGE, stage.as_str());
        let command_id = message.id.clone();
        let receiver = self.registrar.register(command_id.clone(), stage).await;

        let sent = message.clone();
        if let Err(e) = self.bus.send(message).await {
            self.registrar.unregister(&command_id).await;
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(signal)) => Ok(CommandResult::from_signal(signal, &sent)),
            Ok(Err(_)) => Err(GatewayError::WaitCancelled(command_id)),
            Err(_) => {
                self.registrar.unregister(&command_id).await;
                metrics::counter!("gateway_wait_timeouts_total", "stage" => stage.as_str())
                    .increment(1);
                tracing::warn!(?timeout, "Timed out waiting for command");
                Err(GatewayError::WaitTimeout { command_id, stage })
            }
        }
    }

    /// Validates the message and short-circuits duplicates.
    ///
    /// The request id is recorded as seen before the message reaches the
    /// bus, and a Bloom filter cannot forget it. When the send then fails,
    /// retrying with the same request id is reported as a duplicate: the
    /// caller has to retry with a fresh request id.
    async fn check(&self, message: &CommandMessage) -> Result<Option<CommandResult>> {
        message.validate()?;
        let checker = self
            .idempotency
            .get_checker(message.aggregate_id.named_aggregate())
            .await;
        if checker.check(&message.request_id).await {
            return Ok(None);
        }

        metrics::counter!("gateway_duplicates_total").increment(1);
        tracing::info!(request_id = %message.request_id, "Duplicate command request");
        Ok(Some(CommandResult::duplicate(message)))
    }
}
