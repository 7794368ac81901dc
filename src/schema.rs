//! Structured-output validation against tool output schemas

use jsonschema::{Draft, JSONSchema};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of checking structured content against a schema. Exactly one
/// variant ever applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResponse {
    Valid { json_output: String },
    Invalid { error_message: String },
}

impl ValidationResponse {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResponse::Valid { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ValidationResponse::Valid { .. } => None,
            ValidationResponse::Invalid { error_message } => Some(error_message),
        }
    }
}

/// Checks a tool's structured output against its declared output schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &Value, content: &Value) -> ValidationResponse;
}

/// Draft 2020-12 validator backed by the `jsonschema` crate.
///
/// Object schemas that do not state `additionalProperties` are treated as
/// closed: tool outputs are matched strictly unless the schema opts out.
/// Compiled schemas are cached by their serialized form.
pub struct DefaultSchemaValidator {
    cache: RwLock<HashMap<String, Arc<JSONSchema>>>,
}

impl DefaultSchemaValidator {
    pub fn new() -> Self {
        Self { cache: RwLock::new(HashMap::new()) }
    }

    fn compiled(&self, schema: &Value) -> Result<Arc<JSONSchema>, String> {
        let strict = strict_schema(schema);
        let key = strict.to_string();

        if let Some(compiled) = self.cache.read().get(&key) {
            return Ok(Arc::clone(compiled));
        }

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(&strict)
            .map(Arc::new)
            .map_err(|e| e.to_string())?;

        debug!("compiled output schema ({} bytes)", key.len());
        self.cache.write().insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl Default for DefaultSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator for DefaultSchemaValidator {
    fn validate(&self, schema: &Value, content: &Value) -> ValidationResponse {
        let compiled = match self.compiled(schema) {
            Ok(compiled) => compiled,
            Err(cause) => {
                return ValidationResponse::Invalid {
                    error_message: format!("Error parsing tool JSON Schema: {cause}"),
                }
            }
        };

        if let Err(errors) = compiled.validate(content) {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            return ValidationResponse::Invalid {
                error_message: format!(
                    "Validation failed: structuredContent does not match tool outputSchema: {}",
                    details.join(", ")
                ),
            };
        }

        ValidationResponse::Valid { json_output: content.to_string() }
    }
}

/// Apply the closed-by-default policy: an object schema without an
/// `additionalProperties` key gets `additionalProperties: false` at the top
/// level.
fn strict_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Some(obj) = schema.as_object_mut() {
        let is_object_schema = obj.get("type").map(|t| t == "object").unwrap_or(false)
            || obj.contains_key("properties");
        if is_object_schema && !obj.contains_key("additionalProperties") {
            obj.insert("additionalProperties".to_string(), Value::Bool(false));
        }
    }
    schema
}
