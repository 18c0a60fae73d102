//! Collection handle abstraction.
//! Provisioning stages only talk to the collection through this trait, so
//! they can be exercised without a live server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc},
};
use std::time::Duration;

use crate::connection::{LiveConnection, bounded};
use crate::target::TargetIdentity;

/// Operations the bootstrap performs against the target collection.
#[async_trait]
pub trait LogStore: Send + Sync {
    fn database_name(&self) -> &str;

    fn collection_name(&self) -> &str;

    /// Create an index with the given key document, returning its name.
    /// Creating an index that already exists is a no-op.
    async fn create_index(&self, keys: Document) -> Result<String>;

    /// Names of all indexes on the collection, including `_id_`.
    async fn index_names(&self) -> Result<Vec<String>>;

    /// Insert or fully replace the document with this `_id`.
    async fn upsert_by_id(&self, id: &str, document: Document) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Raw `collStats` reply.
    async fn collection_stats(&self) -> Result<Document>;
}

/// The real collection handle. Selecting it has no server-side effect; the
/// database and collection come into existence on the first write.
pub struct MongoStore {
    database: Database,
    collection: Collection<Document>,
    op_timeout: Duration,
}

impl MongoStore {
    pub fn new(connection: &LiveConnection, target: &TargetIdentity) -> Self {
        let database = connection.client().database(&target.database_name);
        let collection = database.collection::<Document>(&target.collection_name);
        Self {
            database,
            collection,
            op_timeout: connection.socket_timeout(),
        }
    }
}

#[async_trait]
impl LogStore for MongoStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    async fn create_index(&self, keys: Document) -> Result<String> {
        let model = IndexModel::builder().keys(keys).build();
        let created = bounded(self.op_timeout, self.collection.create_index(model))
            .await
            .context("createIndexes failed")?;
        Ok(created.index_name)
    }

    async fn index_names(&self) -> Result<Vec<String>> {
        bounded(self.op_timeout, self.collection.list_index_names())
            .await
            .context("Failed to list indexes")
    }

    async fn upsert_by_id(&self, id: &str, document: Document) -> Result<()> {
        bounded(
            self.op_timeout,
            self.collection
                .replace_one(doc! { "_id": id }, document)
                .upsert(true),
        )
        .await
        .context("replaceOne failed")?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        bounded(self.op_timeout, self.collection.find_one(doc! { "_id": id }))
            .await
            .context("findOne failed")
    }

    async fn collection_stats(&self) -> Result<Document> {
        bounded(
            self.op_timeout,
            self.database
                .run_command(doc! { "collStats": self.collection.name() }),
        )
        .await
        .context("collStats failed")
    }
}
