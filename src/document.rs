use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A document as stored in a collection. Field order is preserved.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Builds a document from a JSON object literal. Non-object values yield an
/// empty document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Resolves a dotted field path (`profile.email`) inside a document.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Query predicate understood by every driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Filter {
    #[default]
    All,
    Eq {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    /// Conjunction of `field == value` for every entry of `fields`.
    pub fn all_of(fields: &Document) -> Self {
        Filter::And(
            fields
                .iter()
                .map(|(k, v)| Filter::eq(k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Disjunction of `field == value` for every entry of `fields`.
    pub fn any_of(fields: &Document) -> Self {
        Filter::Or(
            fields
                .iter()
                .map(|(k, v)| Filter::eq(k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn by_id(id: Value) -> Self {
        Filter::eq(ID_FIELD, id)
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => {
                get_path(document, field).is_some_and(|actual| value_matches(actual, value))
            }
            Filter::In { field, values } => get_path(document, field)
                .is_some_and(|actual| values.iter().any(|v| value_matches(actual, v))),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            // An empty `$or` matches nothing.
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }

    /// Renders the filter as a MongoDB query document.
    pub fn to_query(&self) -> Document {
        match self {
            Filter::All => Document::new(),
            Filter::Eq { field, value } => {
                let mut out = Document::new();
                out.insert(field.clone(), value.clone());
                out
            }
            Filter::In { field, values } => {
                let mut out = Document::new();
                out.insert(field.clone(), json!({ "$in": values }));
                out
            }
            Filter::And(filters) => {
                let mut out = Document::new();
                let mut merged = true;
                for f in filters {
                    for (k, v) in f.to_query() {
                        if out.contains_key(&k) {
                            merged = false;
                        }
                        out.insert(k, v);
                    }
                }
                if merged {
                    out
                } else {
                    let parts: Vec<Value> = filters
                        .iter()
                        .map(|f| Value::Object(f.to_query()))
                        .collect();
                    let mut out = Document::new();
                    out.insert("$and".into(), Value::Array(parts));
                    out
                }
            }
            Filter::Or(filters) => {
                let parts: Vec<Value> = filters
                    .iter()
                    .map(|f| Value::Object(f.to_query()))
                    .collect();
                let mut out = Document::new();
                out.insert("$or".into(), Value::Array(parts));
                out
            }
        }
    }
}

/// Equality with MongoDB array semantics: a scalar matches an array field
/// containing it.
fn value_matches(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(items), scalar) if !scalar.is_array() => {
            items.iter().any(|item| value_matches(item, scalar))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, doc, get_path};
    use serde_json::{Value, json};

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let d = doc(json!({"profile": {"email": "a@x.com"}, "tags": ["x", "y"]}));
        assert_eq!(get_path(&d, "profile.email"), Some(&json!("a@x.com")));
        assert_eq!(get_path(&d, "tags.1"), Some(&json!("y")));
        assert_eq!(get_path(&d, "profile.missing"), None);
    }

    #[test]
    fn and_or_filters_follow_field_semantics() {
        let d = doc(json!({"email": "a@x.com", "username": "alice"}));
        let fields = doc(json!({"email": "a@x.com", "username": "bob"}));
        assert!(!Filter::all_of(&fields).matches(&d));
        assert!(Filter::any_of(&fields).matches(&d));
        assert!(!Filter::Or(vec![]).matches(&d));
    }

    #[test]
    fn numbers_compare_by_value_and_arrays_match_members() {
        let d = doc(json!({"n": 1, "roles": ["admin", "user"]}));
        assert!(Filter::eq("n", json!(1.0)).matches(&d));
        assert!(Filter::eq("roles", "admin").matches(&d));
        assert!(Filter::in_values("roles", vec![json!("guest"), json!("user")]).matches(&d));
    }

    #[test]
    fn query_rendering_uses_mongo_operators() {
        let fields = doc(json!({"email": "a@x.com", "username": "bob"}));
        assert_eq!(
            Value::Object(Filter::any_of(&fields).to_query()),
            json!({"$or": [{"email": "a@x.com"}, {"username": "bob"}]})
        );
        assert_eq!(
            Value::Object(Filter::all_of(&fields).to_query()),
            json!({"email": "a@x.com", "username": "bob"})
        );
        assert_eq!(
            Value::Object(Filter::in_values("k", vec![json!(1)]).to_query()),
            json!({"k": {"$in": [1]}})
        );
    }
}
