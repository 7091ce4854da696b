use super::{Schema, ValidateOptions, Violation, ViolationKind};
use crate::document::Document;
use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub kind: FieldKind,
    pub required: bool,
    pub nullable: bool,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub allowed: Vec<Value>,
    pub default: Option<Value>,
    pub nested: Option<ObjectSchema>,
    pub items: Option<Box<FieldRule>>,
}

impl FieldRule {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            nullable: false,
            min_len: None,
            max_len: None,
            allowed: Vec::new(),
            default: None,
            nested: None,
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Length bounds apply to strings (chars) and arrays (items).
    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_len = min;
        self.max_len = max;
        self
    }

    pub fn allow(mut self, values: Vec<Value>) -> Self {
        self.allowed = values;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn object(schema: ObjectSchema) -> Self {
        Self {
            nested: Some(schema),
            ..Self::new(FieldKind::Object)
        }
    }

    pub fn array_of(items: FieldRule) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new(FieldKind::Array)
        }
    }
}

/// Field-rule schema for documents. Unknown fields are rejected unless
/// `allow_unknown` is set on the schema or in the validate options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    fields: Vec<(String, FieldRule)>,
    allow_unknown: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        let name = name.into();
        self.fields.retain(|(n, _)| *n != name);
        self.fields.push((name, rule));
        self
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.allow_unknown = allow;
        self
    }

    fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    fn check_document(
        &self,
        document: Document,
        options: &ValidateOptions,
        prefix: &str,
        violations: &mut Vec<Violation>,
    ) -> Document {
        let allow_unknown = options.allow_unknown.unwrap_or(self.allow_unknown);
        let mut out = Document::new();
        for (name, value) in document {
            let path = join(prefix, &name);
            match self.rule(&name) {
                Some(rule) => {
                    let checked = check_value(value, rule, options, &path, violations);
                    out.insert(name, checked);
                }
                None if allow_unknown => {
                    out.insert(name, value);
                }
                None => violations.push(Violation::new(
                    path,
                    ViolationKind::UnknownField,
                    format!("field '{name}' is not allowed"),
                )),
            }
        }
        for (name, rule) in &self.fields {
            if out.contains_key(name) {
                continue;
            }
            if let Some(default) = &rule.default {
                out.insert(name.clone(), default.clone());
            } else if rule.required {
                violations.push(Violation::new(
                    join(prefix, name),
                    ViolationKind::Required,
                    format!("field '{name}' is required"),
                ));
            }
        }
        out
    }
}

impl Schema for ObjectSchema {
    fn validate(
        &self,
        document: Document,
        options: &ValidateOptions,
    ) -> Result<Document, Vec<Violation>> {
        let mut violations = Vec::new();
        let out = self.check_document(document, options, "", &mut violations);
        if violations.is_empty() {
            Ok(out)
        } else {
            Err(violations)
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn type_mismatch(path: &str, kind: FieldKind, value: &Value) -> Violation {
    Violation::new(
        path,
        ViolationKind::TypeMismatch,
        format!("expected {}, got {}", kind.as_str(), json_type(value)),
    )
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Applies the kind check (with optional coercion) and returns the value to
/// keep. Violations are collected rather than returned early.
fn check_value(
    value: Value,
    rule: &FieldRule,
    options: &ValidateOptions,
    path: &str,
    violations: &mut Vec<Violation>,
) -> Value {
    if value.is_null() {
        if !rule.nullable {
            violations.push(Violation::new(
                path,
                ViolationKind::NotNull,
                "value must not be null",
            ));
        }
        return value;
    }

    let value = match coerce(value, rule.kind, options.convert) {
        Ok(v) => v,
        Err(original) => {
            violations.push(type_mismatch(path, rule.kind, &original));
            return original;
        }
    };

    let len = match &value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = len {
        if let Some(min) = rule.min_len
            && len < min
        {
            violations.push(Violation::new(
                path,
                ViolationKind::MinLength,
                format!("length must be at least {min}"),
            ));
        }
        if let Some(max) = rule.max_len
            && len > max
        {
            violations.push(Violation::new(
                path,
                ViolationKind::MaxLength,
                format!("length must be at most {max}"),
            ));
        }
    }

    if !rule.allowed.is_empty() && !rule.allowed.contains(&value) {
        violations.push(Violation::new(
            path,
            ViolationKind::NotAllowed,
            format!("{value} is not one of the allowed values"),
        ));
    }

    match (value, rule.nested.as_ref(), rule.items.as_deref()) {
        (Value::Object(map), Some(schema), _) => {
            Value::Object(schema.check_document(map, options, path, violations))
        }
        (Value::Array(items), _, Some(item_rule)) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    check_value(item, item_rule, options, &join(path, &i.to_string()), violations)
                })
                .collect(),
        ),
        (other, _, _) => other,
    }
}

fn coerce(value: Value, kind: FieldKind, convert: bool) -> Result<Value, Value> {
    match (kind, value) {
        (FieldKind::Any, v) => Ok(v),
        (FieldKind::String, v @ Value::String(_)) => Ok(v),
        (FieldKind::Boolean, v @ Value::Bool(_)) => Ok(v),
        (FieldKind::Object, v @ Value::Object(_)) => Ok(v),
        (FieldKind::Array, v @ Value::Array(_)) => Ok(v),
        (FieldKind::Number, v @ Value::Number(_)) => Ok(v),
        (FieldKind::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Ok(Value::Number(n))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && convert => Ok(Value::from(f as i64)),
                    _ => Err(Value::Number(n)),
                }
            }
        }
        (FieldKind::Integer, Value::String(s)) if convert => match s.trim().parse::<i64>() {
            Ok(n) => Ok(Value::from(n)),
            Err(_) => Err(Value::String(s)),
        },
        (FieldKind::Number, Value::String(s)) if convert => {
            match s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Ok(Value::Number(n)),
                None => Err(Value::String(s)),
            }
        }
        (FieldKind::Boolean, Value::String(s)) if convert => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(Value::String(s)),
            }
        }
        (_, v) => Err(v),
    }
}
