//! JSON-file-backed vector store.
//!
//! Each collection lives in one JSON file under the database directory
//! and is held in memory behind an `RwLock`. Writes mark the collection
//! dirty; `sync_if_dirty` persists dirty collections with a temp-file
//! rename so a crash never leaves a half-written file. Queries are a
//! full cosine scan, which is fine at the corpus sizes one group holds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::ai::EmbeddingClient;

use super::{Collection, MetadataFilter, QueryMatch, StorageResult, StoredRecord, VectorStorage};

/// On-disk form of one collection. The id counter is persisted so ids
/// stay monotonic across deletions and restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    next_id: u64,
    #[serde(default)]
    records: Vec<StoredRecord>,
}

struct CollectionState {
    records: RwLock<BTreeMap<u64, StoredRecord>>,
    next_id: AtomicU64,
    dirty: AtomicBool,
}

impl CollectionState {
    fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            dirty: AtomicBool::new(false),
        }
    }
}

pub struct JsonVectorStorage {
    db_dir: PathBuf,
    embedder: Arc<dyn EmbeddingClient>,
    collections: [CollectionState; 6],
}

impl JsonVectorStorage {
    pub fn new(db_dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            db_dir: db_dir.into(),
            embedder,
            collections: std::array::from_fn(|_| CollectionState::new()),
        }
    }

    fn state(&self, collection: Collection) -> &CollectionState {
        let index = Collection::ALL
            .iter()
            .position(|c| *c == collection)
            .expect("known collection");
        &self.collections[index]
    }

    fn file_path(&self, collection: Collection) -> PathBuf {
        self.db_dir.join(format!("{}.json", collection.name()))
    }
}

#[async_trait]
impl VectorStorage for JsonVectorStorage {
    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.db_dir)
            .await
            .with_context(|| format!("failed to create db dir {}", self.db_dir.display()))?;
        for collection in Collection::ALL {
            let path = self.file_path(collection);
            let loaded: CollectionFile = read_json_or_default(&path).await?;
            let state = self.state(collection);
            let mut records = state.records.write().await;
            *records = loaded.records.into_iter().map(|r| (r.id, r)).collect();
            let next = records
                .keys()
                .next_back()
                .map_or(1, |max| max + 1)
                .max(loaded.next_id)
                .max(1);
            state.next_id.store(next, Ordering::Release);
            debug!(
                collection = collection.name(),
                count = records.len(),
                next_id = next,
                "collection loaded"
            );
        }
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.sync_if_dirty().await
    }

    async fn put(
        &self,
        collection: Collection,
        text: String,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> StorageResult<u64> {
        let embedding = self.embedder.embed(&text).await?;
        let state = self.state(collection);
        let mut records = state.records.write().await;
        // Ids come from a counter that only moves forward, so a deleted
        // id is never handed out again.
        let id = state.next_id.fetch_add(1, Ordering::AcqRel);
        records.insert(
            id,
            StoredRecord {
                id,
                text,
                metadata,
                embedding,
            },
        );
        state.dirty.store(true, Ordering::Release);
        Ok(id)
    }

    async fn get(
        &self,
        collection: Collection,
        ids: &[u64],
    ) -> StorageResult<Vec<Option<StoredRecord>>> {
        let records = self.state(collection).records.read().await;
        Ok(ids.iter().map(|id| records.get(id).cloned()).collect())
    }

    async fn get_all(&self, collection: Collection) -> StorageResult<Vec<StoredRecord>> {
        let records = self.state(collection).records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn query(
        &self,
        collection: Collection,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> StorageResult<Vec<QueryMatch>> {
        let query_embedding = self.embedder.embed(text).await?;
        let records = self.state(collection).records.read().await;

        let mut matches: Vec<QueryMatch> = records
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .map(|r| QueryMatch {
                id: r.id,
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(&query_embedding, &r.embedding),
            })
            .collect();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, collection: Collection, ids: &[u64]) -> StorageResult<()> {
        let state = self.state(collection);
        let mut records = state.records.write().await;
        let mut changed = false;
        for id in ids {
            changed |= records.remove(id).is_some();
        }
        if changed {
            state.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    async fn count(&self, collection: Collection) -> StorageResult<usize> {
        Ok(self.state(collection).records.read().await.len())
    }

    async fn sync_if_dirty(&self) -> StorageResult<()> {
        for collection in Collection::ALL {
            let state = self.state(collection);
            if !state.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let snapshot = CollectionFile {
                next_id: state.next_id.load(Ordering::Acquire),
                records: {
                    let records = state.records.read().await;
                    records.values().cloned().collect()
                },
            };
            let path = self.file_path(collection);
            if let Err(err) = write_json_atomic(&path, &snapshot).await {
                state.dirty.store(true, Ordering::Release);
                return Err(err).with_context(|| {
                    format!("failed to persist collection {}", collection.name())
                });
            }
            debug!(
                collection = collection.name(),
                count = snapshot.records.len(),
                "collection persisted"
            );
        }
        Ok(())
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MAX;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

async fn read_json_or_default<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(T::default()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt store file {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

/// Temp-file write, fsync, then rename over the target.
async fn write_json_atomic<T>(path: &Path, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&serde_json::to_vec(value)?).await?;
    file.sync_all().await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), f32::MAX);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), f32::MAX);
    }
}
