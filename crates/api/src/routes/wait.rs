//! Remote wait-notification callback.
//!
//! Dispatchers and event processors in other processes post stage signals
//! here for commands that were sent through this process's gateway.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use messaging::{WaitSignal, WaitStrategyRegistrar};
use serde::Serialize;

use crate::error::{ApiError, Result};

#[derive(Debug, Serialize)]
pub struct WaitAck {
    /// Whether the signal completed a pending wait.
    pub delivered: bool,
}

/// POST /command/wait hands a stage signal to the local registrar.
#[tracing::instrument(skip(registrar, body))]
pub async fn notify(
    State(registrar): State<Arc<WaitStrategyRegistrar>>,
    body: std::result::Result<Json<WaitSignal>, JsonRejection>,
) -> Result<Json<WaitAck>> {
    let Json(signal) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let command_id = signal.command_id.clone();
    let stage = signal.stage;

    let delivered = registrar.notify(signal).await;
    tracing::debug!(%command_id, %stage, delivered, "Wait signal received");
    Ok(Json(WaitAck { delivered }))
}
