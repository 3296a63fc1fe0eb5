//! SQLite document backend - stands in for the remote document database

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{apply_patches, ensure_id, Document, DocumentStore, Filter, Patch, Write};
use crate::entities::documents;
use crate::error::{Result, StoreError};

/// Document store persisted in a single `documents` table
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pub(crate) db: DatabaseConnection,
    seq: Arc<AtomicI64>,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteDocumentStore {
    /// Open (or create) the database file at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| StoreError::Validation("Invalid database path".to_string()))?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db = Database::connect(db_url.as_str()).await?;
        let store = Self::with_connection(db).await?;

        info!("Document store initialized at {}", db_path.display());
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // Every pooled connection would see its own empty memory database.
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1);

        let db = Database::connect(options).await?;
        Self::with_connection(db).await
    }

    /// Create a document store with an existing database connection
    pub async fn with_connection(db: DatabaseConnection) -> Result<Self> {
        crate::migration::Migrator::up(&db, None).await?;

        let last_seq = documents::Entity::find()
            .order_by_desc(documents::Column::Seq)
            .one(&db)
            .await?
            .map(|m| m.seq)
            .unwrap_or(0);

        Ok(Self {
            db,
            seq: Arc::new(AtomicI64::new(last_seq)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Insert a row, returning false when `(collection, id)` already exists
    async fn insert_row(&self, collection: &str, id: &str, document: &Document) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let row = documents::ActiveModel {
            collection: Set(collection.to_string()),
            id: Set(id.to_string()),
            seq: Set(self.next_seq()),
            body: Set(serde_json::to_string(document)?),
            updated_at: Set(Utc::now().timestamp_millis()),
        };

        let result = documents::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([documents::Column::Collection, documents::Column::Id])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;

        match result {
            Ok(rows) => Ok(rows > 0),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-patch-write one document inside the caller's transaction
    async fn apply_write<C: ConnectionTrait>(
        conn: &C,
        collection: &str,
        id: &str,
        patches: &[Patch],
    ) -> Result<()> {
        let model = documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(conn)
            .await?
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        let mut document = parse_body(&model)?;
        apply_patches(&mut document, patches)?;

        let mut active: documents::ActiveModel = model.into();
        active.body = Set(serde_json::to_string(&document)?);
        active.updated_at = Set(Utc::now().timestamp_millis());
        active.update(conn).await?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let id = ensure_id(&mut document);

        if !self.insert_row(collection, &id, &document).await? {
            return Err(StoreError::conflict(collection, &id));
        }

        debug!("Inserted document {}/{}", collection, id);
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        mut document: Document,
    ) -> Result<bool> {
        document.insert("id".to_string(), id.into());
        self.insert_row(collection, id, &document).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        documents::Entity::find_by_id((collection.to_string(), id.to_string()))
            .one(&self.db)
            .await?
            .map(|m| parse_body(&m))
            .transpose()
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let rows = documents::Entity::find()
            .filter(documents::Column::Collection.eq(collection))
            .order_by_asc(documents::Column::Seq)
            .all(&self.db)
            .await?;

        let mut matched = Vec::new();
        for row in &rows {
            let document = parse_body(row)?;
            if filter.matches(&document) {
                matched.push(document);
            }
        }

        debug!(
            "Query on {} matched {} of {} documents",
            collection,
            matched.len(),
            rows.len()
        );
        Ok(matched)
    }

    async fn update(&self, collection: &str, id: &str, patches: Vec<Patch>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let txn = self.db.begin().await?;
        Self::apply_write(&txn, collection, id, &patches).await?;
        txn.commit().await?;

        Ok(())
    }

    async fn batch(&self, writes: Vec<Write>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;

        // Dropping the transaction on error rolls every write back.
        let txn = self.db.begin().await?;
        for write in &writes {
            Self::apply_write(&txn, &write.collection, &write.id, &write.patches).await?;
        }
        txn.commit().await?;

        debug!("Committed batch of {} writes", writes.len());
        Ok(())
    }
}

fn parse_body(model: &documents::Model) -> Result<Document> {
    serde_json::from_str(&model.body).map_err(|e| {
        StoreError::Corrupt(format!("{}/{}: {}", model.collection, model.id, e))
    })
}
