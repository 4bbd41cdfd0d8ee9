//! Registry of per-operation mutation handlers.
//!
//! The registry is built once at startup and then shared behind an `Arc`, so
//! it cannot change while batches are running.

use async_trait::async_trait;
use core::fmt;
use grid_core::{ImageId, PollingConfig, Result as CoreResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::MutationAck;
use crate::{Result, UpdateError};

/// Write and confirmation behavior for one operation type.
#[async_trait]
pub trait MutationHandler: Send + Sync {
    /// Issues the write for a single image.
    ///
    /// Resolves once the backend has accepted the write, not necessarily applied it.
    /// Called at most once per image per batch; any retry of the write itself is
    /// the handler's business.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn mutate(&self, image_id: &ImageId, value: &Value) -> CoreResult<MutationAck>;

    /// Returns `true` once the write is observable on the canonical resource.
    ///
    /// # Errors
    ///
    /// Errors are treated as "not yet confirmed" and consume one attempt.
    async fn poll(
        &self,
        image_id: &ImageId,
        value: &Value,
        ack: &MutationAck,
    ) -> CoreResult<bool>;

    /// Polling strategy for this operation, if it differs from the engine default.
    fn polling(&self) -> Option<PollingConfig> {
        None
    }

    /// Follow-up operations to start for confirmed images once a batch settles.
    fn cascades(&self) -> Vec<Cascade> {
        Vec::new()
    }
}

type ValueResolver = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A follow-up batch triggered by a settled batch.
#[derive(Clone)]
pub struct Cascade {
    /// Operation the follow-up batch runs.
    pub operation_type: String,
    /// Field the follow-up batch writes.
    pub field: Option<String>,
    resolve_value: Option<ValueResolver>,
}

impl Cascade {
    /// Cascade that reuses the parent batch's value.
    #[must_use]
    pub fn new(operation_type: impl Into<String>, field: Option<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            field,
            resolve_value: None,
        }
    }

    /// Derive the cascade's value from the parent value.
    #[must_use]
    pub fn with_value(mut self, resolve: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.resolve_value = Some(Arc::new(resolve));
        self
    }

    /// Value for the follow-up batch, derived from the parent value.
    #[must_use]
    pub fn resolve(&self, parent_value: &Value) -> Value {
        match &self.resolve_value {
            Some(resolve) => resolve(parent_value),
            None => parent_value.clone(),
        }
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Cascade")
            .field("operation_type", &self.operation_type)
            .field("field", &self.field)
            .field("resolves_value", &self.resolve_value.is_some())
            .finish()
    }
}

/// Maps operation type strings (e.g. `metadata.title`) to handlers.
#[derive(Default, Clone)]
pub struct MutationRegistry {
    handlers: HashMap<String, Arc<dyn MutationHandler>>,
}

impl MutationRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an operation type.
    ///
    /// # Errors
    /// Returns an error if the operation type is already registered.
    pub fn register(
        &mut self,
        operation_type: impl Into<String>,
        handler: Arc<dyn MutationHandler>,
    ) -> Result<()> {
        let operation_type = operation_type.into();
        if self.handlers.contains_key(&operation_type) {
            return Err(UpdateError::DuplicateOperation(operation_type));
        }
        tracing::debug!("Registered mutation handler for {operation_type}");
        self.handlers.insert(operation_type, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    /// Returns an error if the operation type is already registered.
    pub fn with_handler(
        mut self,
        operation_type: impl Into<String>,
        handler: Arc<dyn MutationHandler>,
    ) -> Result<Self> {
        self.register(operation_type, handler)?;
        Ok(self)
    }

    /// Get the handler registered for an operation type.
    ///
    /// # Errors
    /// Returns an error if nothing is registered under that name.
    pub fn lookup(&self, operation_type: &str) -> Result<Arc<dyn MutationHandler>> {
        self.handlers
            .get(operation_type)
            .cloned()
            .ok_or_else(|| UpdateError::UnknownOperation(operation_type.to_owned()))
    }

    /// Whether `operation_type` has a handler.
    #[must_use]
    pub fn contains(&self, operation_type: &str) -> bool {
        self.handlers.contains_key(operation_type)
    }

    /// Registered operation types, sorted.
    #[must_use]
    pub fn operation_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
