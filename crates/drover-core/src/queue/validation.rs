//! Payload schema checks applied on send and on read.

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::Value;

use crate::domain::{QueueName, SchemaError};

/// A compiled JSON Schema for one queue's payloads.
#[derive(Clone)]
pub struct PayloadSchema {
    document: Arc<Value>,
    validator: Arc<Validator>,
}

impl PayloadSchema {
    pub fn compile(document: &Value) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::validator_for(document).map_err(|e| SchemaError::InvalidSchema {
                reason: e.to_string(),
            })?;
        Ok(Self {
            document: Arc::new(document.clone()),
            validator: Arc::new(validator),
        })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn is_valid(&self, payload: &Value) -> bool {
        self.validator.is_valid(payload)
    }

    /// Check `payload`, collecting every violation into the error.
    pub fn validate(&self, queue: &QueueName, payload: &Value) -> Result<(), SchemaError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(payload)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        Err(SchemaError::Invalid {
            queue: queue.clone(),
            errors,
        })
    }
}

impl fmt::Debug for PayloadSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadSchema")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
