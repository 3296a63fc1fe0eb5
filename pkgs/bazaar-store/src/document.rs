//! Document store interface shared by every backend
//!
//! Documents are JSON objects grouped in named collections. Each document
//! carries its own id under the `"id"` key. Updates are expressed as a list of
//! [`Patch`]es so that backends can apply them atomically, which is what
//! keeps unread counters from losing increments.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// A stored JSON object
pub type Document = Map<String, Value>;

/// Key under which every document stores its id
pub const ID_FIELD: &str = "id";

/// Path to a (possibly nested) field.
///
/// Segments are kept apart rather than dot-joined, so map keys such as user
/// ids may contain any character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    pub fn child(mut self, key: impl Into<String>) -> Self {
        self.0.push(key.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(field: &str) -> Self {
        Self::new(field)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Single field modification
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Set(FieldPath, Value),
    /// Add `delta` to a numeric field; a missing field counts as zero
    Increment(FieldPath, i64),
    /// Drop the field; a missing field is left alone
    Remove(FieldPath),
}

/// Patches addressed to one document, used in batches
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub collection: String,
    pub id: String,
    pub patches: Vec<Patch>,
}

impl Write {
    pub fn new(collection: &str, id: &str, patches: Vec<Patch>) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            patches,
        }
    }
}

/// Query predicate over top-level fields
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    ArrayContains(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Filter::ArrayContains(field.to_string(), value.into())
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => document.get(field).unwrap_or(&Value::Null) == value,
            Filter::ArrayContains(field, value) => document
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a new document and return its id.
    ///
    /// An id is generated when the document has none; an existing id fails
    /// with [`StoreError::Conflict`].
    async fn insert(&self, collection: &str, document: Document) -> Result<String>;

    /// Create the document under `id` unless that id is taken.
    /// Returns whether the document was created.
    async fn insert_if_absent(&self, collection: &str, id: &str, document: Document)
        -> Result<bool>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// All matching documents, in insertion order
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Apply `patches` to one document as a unit
    async fn update(&self, collection: &str, id: &str, patches: Vec<Patch>) -> Result<()>;

    /// Apply every write or none of them
    async fn batch(&self, writes: Vec<Write>) -> Result<()>;
}

/// Fill in the document id, generating one when missing
pub(crate) fn ensure_id(document: &mut Document) -> String {
    match document.get(ID_FIELD).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}

pub(crate) fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

/// Apply patches in order, creating intermediate objects as needed
pub fn apply_patches(document: &mut Document, patches: &[Patch]) -> Result<()> {
    for patch in patches {
        match patch {
            Patch::Set(path, value) => {
                *slot(document, path)? = value.clone();
            }
            Patch::Increment(path, delta) => {
                let target = slot(document, path)?;
                let current = match &*target {
                    Value::Null => 0,
                    Value::Number(n) => n.as_i64().ok_or_else(|| {
                        StoreError::Corrupt(format!("field {path} is not an integer"))
                    })?,
                    _ => {
                        return Err(StoreError::Corrupt(format!(
                            "field {path} is not a number"
                        )))
                    }
                };
                *target = Value::from(current + delta);
            }
            Patch::Remove(path) => remove(document, path)?,
        }
    }
    Ok(())
}

fn slot<'a>(document: &'a mut Document, path: &FieldPath) -> Result<&'a mut Value> {
    let (last, parents) = path
        .segments()
        .split_last()
        .ok_or_else(|| StoreError::Validation("empty field path".to_string()))?;

    if parents.is_empty() && last == ID_FIELD {
        return Err(StoreError::Validation("document id is immutable".to_string()));
    }

    let mut current = document;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry
            .as_object_mut()
            .ok_or_else(|| StoreError::Corrupt(format!("field {path} crosses a non-object")))?;
    }

    Ok(current.entry(last.clone()).or_insert(Value::Null))
}

fn remove(document: &mut Document, path: &FieldPath) -> Result<()> {
    let (last, parents) = path
        .segments()
        .split_last()
        .ok_or_else(|| StoreError::Validation("empty field path".to_string()))?;

    if parents.is_empty() && last == ID_FIELD {
        return Err(StoreError::Validation("document id is immutable".to_string()));
    }

    let mut current = document;
    for segment in parents {
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }

    current.remove(last);
    Ok(())
}

/// Serialize a record into a document
pub fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Corrupt(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Deserialize a document into a record
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_matching() {
        let d = doc(json!({
            "id": "c1",
            "participants": ["alice", "bob"],
            "productId": "p1"
        }));

        assert!(Filter::All.matches(&d));
        assert!(Filter::eq("productId", "p1").matches(&d));
        assert!(!Filter::eq("productId", "p2").matches(&d));
        assert!(Filter::eq("missing", Value::Null).matches(&d));
        assert!(Filter::array_contains("participants", "bob").matches(&d));
        assert!(!Filter::array_contains("participants", "carol").matches(&d));
        assert!(Filter::And(vec![
            Filter::array_contains("participants", "alice"),
            Filter::eq("productId", "p1"),
        ])
        .matches(&d));
    }

    #[test]
    fn test_nested_patches() {
        let mut d = doc(json!({ "id": "c1", "unreadCount": { "alice": 0 } }));

        apply_patches(
            &mut d,
            &[
                Patch::Increment(FieldPath::new("unreadCount").child("bob.smith"), 1),
                Patch::Increment(FieldPath::new("unreadCount").child("bob.smith"), 1),
                Patch::Set(FieldPath::new("unreadCount").child("alice"), json!(0)),
                Patch::Set("updatedAt".into(), json!("2025-03-01T12:00:00Z")),
            ],
        )
        .unwrap();

        assert_eq!(d["unreadCount"]["bob.smith"], 2);
        assert_eq!(d["unreadCount"]["alice"], 0);
        assert_eq!(d["updatedAt"], "2025-03-01T12:00:00Z");

        apply_patches(
            &mut d,
            &[
                Patch::Remove(FieldPath::new("unreadCount").child("alice")),
                Patch::Remove(FieldPath::new("productId").child("nested")),
            ],
        )
        .unwrap();
        assert!(d["unreadCount"].get("alice").is_none());
        assert!(d.get("productId").is_none());
    }

    #[test]
    fn test_patch_rejects_bad_targets() {
        let mut d = doc(json!({ "id": "c1", "content": "hi" }));

        let err = apply_patches(&mut d, &[Patch::Increment("content".into(), 1)]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        let err = apply_patches(&mut d, &[Patch::Set("id".into(), json!("c2"))]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_ensure_id_generates_when_blank() {
        let mut d = doc(json!({ "id": "", "content": "hi" }));
        let id = ensure_id(&mut d);

        assert!(!id.is_empty());
        assert_eq!(document_id(&d), Some(id.as_str()));
    }
}
