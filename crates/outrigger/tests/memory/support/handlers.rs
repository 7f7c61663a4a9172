//! Test handlers for batch consumption scenarios.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use outrigger::{DeliveryContext, Error, MessageHandler, Result};

/// What a [`Step`] payload asks the handler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Process normally.
    #[default]
    Ok,
    /// Fail with a business error.
    Fail,
    /// Panic mid-processing.
    Panic,
    /// Fail with the guard's "already completed" condition.
    AlreadyCompleted,
}

/// Scripted payload for the recording handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub label: String,
    #[serde(default)]
    pub outcome: Outcome,
}

impl Step {
    pub fn ok(label: &str) -> Self {
        Self {
            label: label.to_string(),
            outcome: Outcome::Ok,
        }
    }

    pub fn with(label: &str, outcome: Outcome) -> Self {
        Self {
            label: label.to_string(),
            outcome,
        }
    }

    pub fn body(&self) -> String {
        serde_json::to_string(self).expect("Step should serialize")
    }
}

/// Handler for the `steps` queue that records every invocation.
///
/// Skipped messages (FIFO fail-fast, abandoned reconciliation) must never
/// appear in the processed list, which is what most delivery tests assert.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    processed: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    type Payload = Step;

    const QUEUE: &'static str = "steps";

    async fn handle(&self, payload: Step, _ctx: &DeliveryContext) -> Result<()> {
        self.processed.lock().unwrap().push(payload.label.clone());

        match payload.outcome {
            Outcome::Ok => Ok(()),
            Outcome::Fail => Err(Error::business(format!("step {} failed", payload.label))),
            Outcome::Panic => panic!("step {} panicked", payload.label),
            Outcome::AlreadyCompleted => Err(Error::AlreadyCompleted {
                key: payload.label,
            }),
        }
    }
}
