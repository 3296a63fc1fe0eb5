//! Backend selection

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::{Document, DocumentStore, Filter, Patch, Write};
use crate::error::Result;
use crate::local_store::{BlobKeys, LocalDocumentStore};
use crate::sqlite_store::SqliteDocumentStore;

/// Backend kind, as named in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Sqlite,
    Local,
    Memory,
}

/// Database information to use to create a client
#[derive(Debug, Clone)]
pub enum DatabaseInfo {
    /// SQLite database file
    Sqlite { path: PathBuf },
    /// Private in-memory SQLite database
    SqliteMemory,
    /// Local blobs stored as files in a directory
    Local { dir: PathBuf, keys: BlobKeys },
    /// Local blobs kept in memory
    Memory { keys: BlobKeys },
}

/// Database
#[derive(Clone)]
pub enum Database {
    /// Document database backend
    Sqlite(SqliteDocumentStore),
    /// Mock backend over keyed blobs
    Local(LocalDocumentStore),
}

impl DatabaseInfo {
    /// Create a database client from the given database information
    pub async fn connect(self) -> Result<Database> {
        let database = match self {
            DatabaseInfo::Sqlite { path } => Database::Sqlite(SqliteDocumentStore::new(path).await?),
            DatabaseInfo::SqliteMemory => Database::Sqlite(SqliteDocumentStore::in_memory().await?),
            DatabaseInfo::Local { dir, keys } => {
                Database::Local(LocalDocumentStore::open(dir, keys).await?)
            }
            DatabaseInfo::Memory { keys } => Database::Local(LocalDocumentStore::in_memory(keys)),
        };

        info!("Connected to {} backend", database.kind());
        Ok(database)
    }
}

impl Database {
    pub fn kind(&self) -> &'static str {
        match self {
            Database::Sqlite(_) => "sqlite",
            Database::Local(_) => "local",
        }
    }

    fn inner(&self) -> &dyn DocumentStore {
        match self {
            Database::Sqlite(db) => db,
            Database::Local(db) => db,
        }
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn insert(&self, collection: &str, document: Document) -> Result<String> {
        self.inner().insert(collection, document).await
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<bool> {
        self.inner().insert_if_absent(collection, id, document).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner().get(collection, id).await
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.inner().query(collection, filter).await
    }

    async fn update(&self, collection: &str, id: &str, patches: Vec<Patch>) -> Result<()> {
        self.inner().update(collection, id, patches).await
    }

    async fn batch(&self, writes: Vec<Write>) -> Result<()> {
        self.inner().batch(writes).await
    }
}
