//! Local document backend - the offline mock of the remote store
//!
//! Each collection lives in one keyed blob holding the whole collection as a
//! JSON array. Every operation reads the full blob, mutates it in memory and
//! writes the full blob back; nothing is appended or partially persisted.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{
    apply_patches, document_id, ensure_id, Document, DocumentStore, Filter, Patch, Write,
};
use crate::error::{Result, StoreError};
use crate::{CONVERSATIONS, MESSAGES};

/// Raw keyed blob persistence, the role local storage plays for the browser mock
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, contents: String) -> Result<()>;
}

/// One `<key>.json` file per blob under a directory
#[derive(Debug, Clone)]
pub struct FileBlobStorage {
    dir: PathBuf,
}

impl FileBlobStorage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        info!("Blob storage initialized at {}", dir.display());
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl BlobStorage for FileBlobStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, contents: String) -> Result<()> {
        // Write then rename so a crash never leaves a half-written blob.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Blobs held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStorage {
    blobs: Arc<parking_lot::Mutex<HashMap<String, String>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, contents: String) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), contents);
        Ok(())
    }
}

/// Blob key for each collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobKeys {
    pub messages: String,
    pub conversations: String,
}

impl Default for BlobKeys {
    fn default() -> Self {
        Self {
            messages: "mockMessages".to_string(),
            conversations: "mockConversations".to_string(),
        }
    }
}

impl BlobKeys {
    fn key_for<'a>(&'a self, collection: &'a str) -> &'a str {
        match collection {
            MESSAGES => &self.messages,
            CONVERSATIONS => &self.conversations,
            other => other,
        }
    }
}

/// Document store over whole-collection blobs
#[derive(Clone)]
pub struct LocalDocumentStore {
    blobs: Arc<dyn BlobStorage>,
    keys: BlobKeys,
    lock: Arc<Mutex<()>>,
}

impl LocalDocumentStore {
    pub fn new(blobs: Arc<dyn BlobStorage>, keys: BlobKeys) -> Self {
        Self {
            blobs,
            keys,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Blobs stored as files under `dir`
    pub async fn open(dir: PathBuf, keys: BlobKeys) -> Result<Self> {
        let blobs = FileBlobStorage::new(dir).await?;
        Ok(Self::new(Arc::new(blobs), keys))
    }

    /// Blobs kept in memory only
    pub fn in_memory(keys: BlobKeys) -> Self {
        Self::new(Arc::new(MemoryBlobStorage::new()), keys)
    }

    async fn load(&self, collection: &str) -> Result<Vec<Document>> {
        let key = self.keys.key_for(collection);
        let Some(contents) = self.blobs.read(key).await? else {
            return Ok(Vec::new());
        };

        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Corrupt(format!("blob {}: {}", key, e)))?;

        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(document) => Ok(document),
                    other => Err(StoreError::Corrupt(format!(
                        "blob {} holds a non-object entry: {}",
                        key, other
                    ))),
                })
                .collect(),
            _ => Err(StoreError::Corrupt(format!("blob {} is not an array", key))),
        }
    }

    async fn save(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let key = self.keys.key_for(collection);
        let array = Value::Array(documents.into_iter().map(Value::Object).collect());
        self.blobs.write(key, serde_json::to_string(&array)?).await?;

        debug!("Rewrote blob {}", key);
        Ok(())
    }
}

fn position(documents: &[Document], id: &str) -> Option<usize> {
    documents.iter().position(|d| document_id(d) == Some(id))
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let _guard = self.lock.lock().await;

        let id = ensure_id(&mut document);
        let mut documents = self.load(collection).await?;
        if position(&documents, &id).is_some() {
            return Err(StoreError::conflict(collection, &id));
        }

        documents.push(document);
        self.save(collection, documents).await?;

        debug!("Inserted document {}/{}", collection, id);
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        mut document: Document,
    ) -> Result<bool> {
        let _guard = self.lock.lock().await;

        let mut documents = self.load(collection).await?;
        if position(&documents, id).is_some() {
            return Ok(false);
        }

        document.insert("id".to_string(), id.into());
        documents.push(document);
        self.save(collection, documents).await?;
        Ok(true)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let _guard = self.lock.lock().await;

        let documents = self.load(collection).await?;
        Ok(documents.into_iter().find(|d| document_id(d) == Some(id)))
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let _guard = self.lock.lock().await;

        let documents = self.load(collection).await?;
        Ok(documents.into_iter().filter(|d| filter.matches(d)).collect())
    }

    async fn update(&self, collection: &str, id: &str, patches: Vec<Patch>) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut documents = self.load(collection).await?;
        let index =
            position(&documents, id).ok_or_else(|| StoreError::not_found(collection, id))?;

        apply_patches(&mut documents[index], &patches)?;
        self.save(collection, documents).await
    }

    async fn batch(&self, writes: Vec<Write>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;

        // Patch everything in memory first; blobs are only rewritten once all
        // writes have applied cleanly.
        let mut touched: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for write in &writes {
            if !touched.contains_key(&write.collection) {
                let documents = self.load(&write.collection).await?;
                touched.insert(write.collection.clone(), documents);
            }
            let documents = touched
                .get_mut(&write.collection)
                .ok_or_else(|| StoreError::not_found(&write.collection, &write.id))?;
            let index = position(documents, &write.id)
                .ok_or_else(|| StoreError::not_found(&write.collection, &write.id))?;
            apply_patches(&mut documents[index], &write.patches)?;
        }

        for (collection, documents) in touched {
            self.save(&collection, documents).await?;
        }

        debug!("Committed batch of {} writes", writes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FieldPath;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_collection_is_one_json_array() {
        let blobs = Arc::new(MemoryBlobStorage::new());
        let store = LocalDocumentStore::new(blobs.clone(), BlobKeys::default());

        store
            .insert(MESSAGES, doc(json!({ "id": "m1", "content": "hi" })))
            .await
            .unwrap();
        store
            .insert(MESSAGES, doc(json!({ "id": "m2", "content": "hello" })))
            .await
            .unwrap();

        let raw = blobs.read("mockMessages").await.unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));
        assert!(blobs.read("mockConversations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = LocalDocumentStore::in_memory(BlobKeys::default());
        store
            .insert(MESSAGES, doc(json!({ "id": "m1", "read": false })))
            .await
            .unwrap();

        let result = store
            .batch(vec![
                Write::new(MESSAGES, "m1", vec![Patch::Set("read".into(), json!(true))]),
                Write::new(MESSAGES, "missing", vec![Patch::Set("read".into(), json!(true))]),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        let m1 = store.get(MESSAGES, "m1").await.unwrap().unwrap();
        assert_eq!(m1["read"], false);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_reported() {
        let blobs = Arc::new(MemoryBlobStorage::new());
        blobs
            .write("mockConversations", "{not json".to_string())
            .await
            .unwrap();
        let store = LocalDocumentStore::new(blobs, BlobKeys::default());

        let err = store.query(CONVERSATIONS, &Filter::All).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_update_increments_nested_counter() {
        let store = LocalDocumentStore::in_memory(BlobKeys::default());
        store
            .insert(CONVERSATIONS, doc(json!({ "id": "c1", "unreadCount": {} })))
            .await
            .unwrap();

        let path = FieldPath::new("unreadCount").child("bob");
        store
            .update(CONVERSATIONS, "c1", vec![Patch::Increment(path.clone(), 1)])
            .await
            .unwrap();
        store
            .update(CONVERSATIONS, "c1", vec![Patch::Increment(path, 1)])
            .await
            .unwrap();

        let c1 = store.get(CONVERSATIONS, "c1").await.unwrap().unwrap();
        assert_eq!(c1["unreadCount"]["bob"], 2);
    }
}
