mod object;

pub use object::{FieldKind, FieldRule, ObjectSchema};

use crate::document::Document;
use crate::error::BootstrapError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Required,
    NotNull,
    TypeMismatch,
    UnknownField,
    MinLength,
    MaxLength,
    NotAllowed,
}

/// One violated constraint, addressed by dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Coerce compatible values (`"42"` into `42`) instead of rejecting them.
    pub convert: bool,
    /// Overrides the schema's own unknown-field policy when set.
    pub allow_unknown: Option<bool>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            convert: true,
            allow_unknown: None,
        }
    }
}

impl ValidateOptions {
    pub fn strict() -> Self {
        Self {
            convert: false,
            allow_unknown: None,
        }
    }
}

/// Schema engine seam. Returns the validated (possibly coerced) document or
/// every violated constraint.
pub trait Schema: Send + Sync {
    fn validate(
        &self,
        document: Document,
        options: &ValidateOptions,
    ) -> Result<Document, Vec<Violation>>;
}

#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<dyn Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema` under `key`, replacing any previous registration.
    pub fn register_schema(&self, key: impl Into<String>, schema: Arc<dyn Schema>) {
        let key = key.into();
        info!(schema = %key, "registering schema");
        if self.schemas.write().insert(key.clone(), schema).is_some() {
            trace!(schema = %key, "previous schema registration replaced");
        }
    }

    pub fn get_schema(&self, key: &str) -> Option<Arc<dyn Schema>> {
        self.schemas.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.schemas.read().contains_key(key)
    }

    /// Validates `document` against the schema registered under `key`.
    /// Unregistered keys pass the document through unchanged.
    pub fn validate(
        &self,
        key: &str,
        document: Document,
        options: &ValidateOptions,
    ) -> Result<Document, BootstrapError> {
        let Some(schema) = self.get_schema(key) else {
            return Ok(document);
        };
        schema
            .validate(document, options)
            .map_err(|violations| BootstrapError::Validation {
                schema_key: key.to_string(),
                violations,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, FieldRule, ObjectSchema, SchemaRegistry, ValidateOptions, ViolationKind};
    use crate::document::doc;
    use crate::error::BootstrapError;
    use serde_json::json;
    use std::sync::Arc;

    fn user_schema() -> ObjectSchema {
        ObjectSchema::new()
            .field("email", FieldRule::new(FieldKind::String).required())
            .field("age", FieldRule::new(FieldKind::Integer))
    }

    #[test]
    fn unregistered_key_passes_document_through() {
        let registry = SchemaRegistry::new();
        let input = doc(json!({"anything": [1, 2, 3], "nested": {"x": null}}));
        let out = registry
            .validate("missing", input.clone(), &ValidateOptions::default())
            .expect("passthrough");
        assert_eq!(out, input);
    }

    #[test]
    fn validation_failure_carries_schema_key_and_constraints() {
        let registry = SchemaRegistry::new();
        registry.register_schema("user", Arc::new(user_schema()));

        let err = registry
            .validate("user", doc(json!({"age": "old"})), &ValidateOptions::default())
            .expect_err("invalid user");
        let BootstrapError::Validation {
            schema_key,
            violations,
        } = err
        else {
            panic!("expected validation error");
        };
        assert_eq!(schema_key, "user");
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::Required));
        assert!(kinds.contains(&ViolationKind::TypeMismatch));
    }

    #[test]
    fn last_registration_wins() {
        let registry = SchemaRegistry::new();
        registry.register_schema("user", Arc::new(user_schema()));
        registry.register_schema("user", Arc::new(ObjectSchema::new().allow_unknown(true)));

        let out = registry
            .validate("user", doc(json!({"free": "form"})), &ValidateOptions::default())
            .expect("replacement schema accepts unknown fields");
        assert_eq!(out, doc(json!({"free": "form"})));
        assert!(registry.get_schema("user").is_some());
        assert!(registry.get_schema("other").is_none());
    }

    #[test]
    fn convert_option_controls_coercion() {
        let registry = SchemaRegistry::new();
        registry.register_schema("user", Arc::new(user_schema()));

        let converted = registry
            .validate(
                "user",
                doc(json!({"email": "a@x.com", "age": "42"})),
                &ValidateOptions::default(),
            )
            .expect("coerced");
        assert_eq!(converted.get("age"), Some(&json!(42)));

        let strict = registry.validate(
            "user",
            doc(json!({"email": "a@x.com", "age": "42"})),
            &ValidateOptions::strict(),
        );
        assert!(matches!(strict, Err(BootstrapError::Validation { .. })));
    }
}
