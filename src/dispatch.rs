// 📬 Queue Dispatch - route queue records to handlers by discriminator
//
// Handlers are registered once at startup. Each record goes to the one
// handler whose discriminator it carries; records nobody accepts are errors.

use crate::error::{Failure, FailureSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// QUEUE RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Queue-side id, used only for logging
    pub uuid: String,
    pub discriminator: String,
    pub payload: Value,
}

impl QueueRecord {
    pub fn new(uuid: impl Into<String>, discriminator: impl Into<String>, payload: Value) -> Self {
        QueueRecord {
            uuid: uuid.into(),
            discriminator: discriminator.into(),
            payload,
        }
    }

    /// Queue files hold either one record or an array of records
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<QueueRecord>> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read queue file: {:?}", path.as_ref()))?;

        Self::parse_all(&content)
    }

    pub fn parse_all(content: &str) -> Result<Vec<QueueRecord>> {
        let value: Value = serde_json::from_str(content).context("Failed to parse queue JSON")?;

        match value {
            Value::Array(_) => serde_json::from_value(value).context("Invalid queue record in array"),
            other => Ok(vec![serde_json::from_value(other).context("Invalid queue record")?]),
        }
    }
}

// ============================================================================
// HANDLER INTERFACE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HandlerOutcome {
    /// Permanent id of the entity this record maps to
    pub entity_id: String,

    /// False when the record was a replay
    pub created: bool,

    pub warnings: Vec<Failure>,
}

pub trait QueueHandler: Send + Sync {
    fn discriminator(&self) -> &str;

    fn accept(&self, record: &QueueRecord) -> bool {
        record.discriminator == self.discriminator()
    }

    /// Dry run: no side effects on the store. Ok carries soft warnings.
    fn validate(&self, record: &QueueRecord) -> Result<Vec<Failure>, FailureSet>;

    fn process(&self, record: &QueueRecord) -> Result<HandlerOutcome, FailureSet>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No handler accepts discriminator '{0}'")]
    NoHandler(String),

    #[error("A handler for discriminator '{0}' is already registered")]
    DuplicateHandler(String),

    #[error(transparent)]
    Failed(#[from] FailureSet),
}

// ============================================================================
// HANDLER REGISTRY
// ============================================================================

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn QueueHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn QueueHandler>) -> Result<(), DispatchError> {
        let discriminator = handler.discriminator();

        if self.handlers.iter().any(|h| h.discriminator() == discriminator) {
            return Err(DispatchError::DuplicateHandler(discriminator.to_string()));
        }

        log::debug!("Registered queue handler for '{}'", discriminator);
        self.handlers.push(handler);
        Ok(())
    }

    pub fn handler_for(&self, record: &QueueRecord) -> Option<&Arc<dyn QueueHandler>> {
        self.handlers.iter().find(|h| h.accept(record))
    }

    pub fn discriminators(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.discriminator()).collect()
    }

    pub fn validate(&self, record: &QueueRecord) -> Result<Vec<Failure>, DispatchError> {
        let handler = self.require(record)?;
        Ok(handler.validate(record)?)
    }

    pub fn process(&self, record: &QueueRecord) -> Result<HandlerOutcome, DispatchError> {
        let handler = self.require(record)?;
        Ok(handler.process(record)?)
    }

    fn require(&self, record: &QueueRecord) -> Result<&Arc<dyn QueueHandler>, DispatchError> {
        self.handler_for(record).ok_or_else(|| {
            log::warn!("No handler for queue record {} ({})", record.uuid, record.discriminator);
            DispatchError::NoHandler(record.discriminator.clone())
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
