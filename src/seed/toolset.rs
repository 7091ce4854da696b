use super::script::{Call, ScriptError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub type ToolFn = Arc<dyn Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync>;

const DEFAULT_RANDOM_LEN: usize = 16;

/// Base64 SHA-256 digest of `password`.
pub fn encrypt_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Named functions that seed documents may call through `js:{...}` markers.
/// Nothing outside this table is reachable from a marker.
#[derive(Clone)]
pub struct SeedingToolset {
    functions: BTreeMap<String, ToolFn>,
}

impl Default for SeedingToolset {
    fn default() -> Self {
        let mut toolset = Self::empty();
        toolset.register("encryptPassword", |args| {
            let password = string_arg("encryptPassword", args, 0)?;
            debug!("encrypting password");
            Ok(Value::String(encrypt_password(password)))
        });
        toolset.register("randomValue", |args| {
            let len = match args.first() {
                None => DEFAULT_RANDOM_LEN,
                Some(Value::Number(n)) => n.as_u64().ok_or_else(|| ScriptError::Arguments {
                    function: "randomValue".into(),
                    message: "length must be a non-negative integer".into(),
                })? as usize,
                Some(other) => {
                    return Err(ScriptError::Arguments {
                        function: "randomValue".into(),
                        message: format!("length must be a number, got {other}"),
                    });
                }
            };
            let value: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            Ok(Value::String(value))
        });
        toolset.register("uuid", |_| {
            Ok(Value::String(uuid::Uuid::new_v4().to_string()))
        });
        toolset.register("now", |_| Ok(Value::String(chrono::Utc::now().to_rfc3339())));
        toolset
    }
}

impl SeedingToolset {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn call(&self, call: &Call) -> Result<Value, ScriptError> {
        let f = self
            .functions
            .get(&call.name)
            .ok_or_else(|| ScriptError::UnknownFunction(call.name.clone()))?;
        f(&call.args)
    }
}

fn string_arg<'a>(function: &str, args: &'a [Value], pos: usize) -> Result<&'a str, ScriptError> {
    match args.get(pos) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ScriptError::Arguments {
            function: function.to_string(),
            message: format!("argument {pos} must be a string, got {other}"),
        }),
        None => Err(ScriptError::Arguments {
            function: function.to_string(),
            message: format!("missing argument {pos}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{SeedingToolset, encrypt_password};
    use crate::seed::script::{ScriptError, parse_call};
    use serde_json::{Value, json};

    #[test]
    fn encrypt_password_is_deterministic() {
        assert_eq!(encrypt_password("secret"), encrypt_password("secret"));
        assert_ne!(encrypt_password("secret"), encrypt_password("Secret"));
        assert_eq!(
            encrypt_password("secret"),
            "K7gNU3sdo+OL0wNhqoVWhr3g6s1xYv72ol/pe/Unols="
        );
    }

    #[test]
    fn builtins_are_callable_by_name() {
        let toolset = SeedingToolset::default();
        assert_eq!(
            toolset.names(),
            vec!["encryptPassword", "now", "randomValue", "uuid"]
        );
        let random = toolset
            .call(&parse_call("randomValue(8)").expect("parse"))
            .expect("call");
        assert_eq!(random.as_str().map(str::len), Some(8));
        let id = toolset.call(&parse_call("uuid()").expect("parse")).expect("uuid");
        assert_eq!(id.as_str().map(str::len), Some(36));
    }

    #[test]
    fn bad_arguments_and_unknown_functions_are_errors() {
        let toolset = SeedingToolset::default();
        assert!(matches!(
            toolset.call(&parse_call("encryptPassword(42)").expect("parse")),
            Err(ScriptError::Arguments { .. })
        ));
        assert!(matches!(
            toolset.call(&parse_call("require('fs')").expect("parse")),
            Err(ScriptError::UnknownFunction(_))
        ));
    }

    #[test]
    fn custom_functions_can_be_registered() {
        let mut toolset = SeedingToolset::empty();
        toolset.register("constant", |_| Ok(json!(7)));
        assert_eq!(
            toolset.call(&parse_call("constant").expect("parse")),
            Ok(Value::from(7))
        );
    }
}
