use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod json_vector;

pub use json_vector::JsonVectorStorage;

pub type StorageResult<T> = Result<T>;

/// The collections that make up one index database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Group,
    Document,
    Chunk,
    Relationship,
    CommunityReport,
    Summary,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Group,
        Collection::Document,
        Collection::Chunk,
        Collection::Relationship,
        Collection::CommunityReport,
        Collection::Summary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Group => "group",
            Collection::Document => "document",
            Collection::Chunk => "chunk",
            Collection::Relationship => "relationship",
            Collection::CommunityReport => "community_report",
            Collection::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: u64,
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Cosine distance to the query embedding; smaller is closer.
    pub distance: f32,
}

/// Equality filter over one metadata field.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub key: String,
    pub value: serde_json::Value,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &HashMap<String, serde_json::Value>) -> bool {
        metadata.get(&self.key) == Some(&self.value)
    }
}

/// Per-collection vector store: records carry text, JSON metadata and an
/// embedding; ids are integers that increase monotonically per collection.
#[async_trait]
pub trait VectorStorage: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    /// Insert a record, embedding its text. Returns the assigned id.
    async fn put(
        &self,
        collection: Collection,
        text: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> StorageResult<u64>;

    async fn get(&self, collection: Collection, ids: &[u64])
    -> StorageResult<Vec<Option<StoredRecord>>>;

    async fn get_all(&self, collection: Collection) -> StorageResult<Vec<StoredRecord>>;

    /// Nearest neighbors of `text` by cosine distance, after applying
    /// the optional metadata filter.
    async fn query(
        &self,
        collection: Collection,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> StorageResult<Vec<QueryMatch>>;

    async fn delete(&self, collection: Collection, ids: &[u64]) -> StorageResult<()>;

    async fn count(&self, collection: Collection) -> StorageResult<usize>;

    /// Flush dirty collections to disk.
    async fn sync_if_dirty(&self) -> StorageResult<()>;
}
