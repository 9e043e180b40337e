//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to their passage.
//! Similarity search is brute force: every candidate row (optionally
//! filtered by source) is decoded and scored with cosine similarity.
//!
//! Every operation runs under the `db.store_timeout_ms` deadline. An
//! elapsed deadline surfaces as [`RagError::UpstreamTimeout`], and any SQL
//! failure as [`RagError::UpstreamFailure`].

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use balanced_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use balanced_rag_core::error::{RagError, Result};
use balanced_rag_core::models::{Neighbor, Passage};
use balanced_rag_core::store::{rank_neighbors, VectorStore};

use crate::config::Config;
use crate::{db, migrate};

/// Hashes per `IN (...)` lookup, well under SQLite's bound-parameter limit.
const HASH_LOOKUP_CHUNK: usize = 500;

/// Stored passage count and newest insert time for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStat {
    pub source: String,
    pub stored: u64,
    pub last_insert: Option<i64>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    timeout_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, timeout_ms: u64) -> Self {
        Self { pool, timeout_ms }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool, config.db.store_timeout_ms))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Per-source counts and last insert timestamps, largest source first.
    pub async fn source_stats(&self) -> Result<Vec<SourceStat>> {
        let rows = self
            .bounded(
                "store.source_stats",
                sqlx::query(
                    r#"
                    SELECT source, COUNT(*) AS stored, MAX(created_at) AS last_insert
                    FROM passages
                    GROUP BY source
                    ORDER BY stored DESC, source
                    "#,
                )
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let stored: i64 = row.get("stored");
                SourceStat {
                    source: row.get("source"),
                    stored: stored as u64,
                    last_insert: row.get("last_insert"),
                }
            })
            .collect())
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RagError::upstream(operation, e)),
            Err(_) => Err(RagError::timeout(operation, self.timeout_ms)),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn count(&self) -> Result<u64> {
        let total: i64 = self
            .bounded(
                "store.count",
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM passages").fetch_one(&self.pool),
            )
            .await?;
        Ok(total as u64)
    }

    async fn count_by_source(&self) -> Result<Vec<(String, u64)>> {
        let rows = self
            .bounded(
                "store.count_by_source",
                sqlx::query(
                    "SELECT source, COUNT(*) AS n FROM passages GROUP BY source ORDER BY source",
                )
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let source: String = row.get("source");
                let n: i64 = row.get("n");
                (source, n as u64)
            })
            .collect())
    }

    async fn existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let pool = &self.pool;

        self.bounded("store.existing_hashes", async move {
            let mut found = HashSet::new();
            for chunk in hashes.chunks(HASH_LOOKUP_CHUNK) {
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new("SELECT content_hash FROM passages WHERE content_hash IN (");
                let mut separated = builder.separated(", ");
                for hash in chunk {
                    separated.push_bind(hash.as_str());
                }
                separated.push_unseparated(")");

                let rows: Vec<String> = builder.build_query_scalar().fetch_all(pool).await?;
                found.extend(rows);
            }
            Ok(found)
        })
        .await
    }

    async fn bulk_insert(&self, passages: &[Passage]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let pool = &self.pool;

        self.bounded("store.bulk_insert", async move {
            let mut tx = pool.begin().await?;
            let mut inserted = 0u64;

            for passage in passages {
                let result = sqlx::query(
                    r#"
                    INSERT INTO passages (content_hash, source, text, embedding, dims, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(content_hash) DO NOTHING
                    "#,
                )
                .bind(&passage.content_hash)
                .bind(&passage.source_id)
                .bind(&passage.text)
                .bind(vec_to_blob(&passage.vector))
                .bind(passage.vector.len() as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }

            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }

    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self
            .bounded("store.nearest_neighbors", async {
                match source {
                    Some(source) => {
                        sqlx::query(
                            "SELECT content_hash, source, text, embedding FROM passages \
                             WHERE source = ? ORDER BY rowid",
                        )
                        .bind(source)
                        .fetch_all(&self.pool)
                        .await
                    }
                    None => {
                        sqlx::query(
                            "SELECT content_hash, source, text, embedding FROM passages \
                             ORDER BY rowid",
                        )
                        .fetch_all(&self.pool)
                        .await
                    }
                }
            })
            .await?;

        let neighbors = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let similarity = cosine_similarity(query, &vector) as f64;
                Neighbor {
                    passage: Passage {
                        content_hash: row.get("content_hash"),
                        text: row.get("text"),
                        source_id: row.get("source"),
                        vector,
                    },
                    similarity,
                }
            })
            .collect();

        Ok(rank_neighbors(neighbors, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balanced_rag_core::models::PassageCandidate;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("brag.sqlite").display()
        ))
        .unwrap();
        SqliteStore::open(&config).await.unwrap()
    }

    fn passage(text: &str, source: &str, vector: Vec<f32>) -> Passage {
        PassageCandidate::new(text, source).into_passage(vector)
    }

    #[tokio::test]
    async fn test_bulk_insert_skips_existing_hashes() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let first = vec![
            passage("one passage of text", "a", vec![1.0, 0.0]),
            passage("two passage of text", "b", vec![0.0, 1.0]),
        ];
        assert_eq!(store.bulk_insert(&first).await.unwrap(), 2);

        let second = vec![
            passage("one passage of text", "b", vec![0.5, 0.5]),
            passage("three passage of text", "a", vec![1.0, 1.0]),
        ];
        assert_eq!(store.bulk_insert(&second).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 3);

        // The first write wins: source and vector are not overwritten.
        let hits = store
            .nearest_neighbors(&[1.0, 0.0], 1, None)
            .await
            .unwrap();
        assert_eq!(hits[0].passage.text, "one passage of text");
        assert_eq!(hits[0].passage.source_id, "a");
        assert_eq!(hits[0].passage.vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_nearest_neighbors_filters_and_orders() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .bulk_insert(&[
                passage("far away from query", "a", vec![0.0, 1.0]),
                passage("close to the query", "a", vec![1.0, 0.1]),
                passage("exact match for query", "b", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let all = store.nearest_neighbors(&[1.0, 0.0], 3, None).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|n| n.passage.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["exact match for query", "close to the query", "far away from query"]
        );

        let only_a = store
            .nearest_neighbors(&[1.0, 0.0], 5, Some("a"))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|n| n.passage.source_id == "a"));
    }

    #[tokio::test]
    async fn test_count_by_source_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .bulk_insert(&[
                passage("zeta passage text", "z", vec![1.0]),
                passage("alpha passage one", "a", vec![1.0]),
                passage("alpha passage two", "a", vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(
            store.count_by_source().await.unwrap(),
            vec![("a".to_string(), 2), ("z".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_existing_hashes_across_chunks() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let stored: Vec<Passage> = (0..3)
            .map(|i| passage(&format!("stored passage {}", i), "a", vec![1.0]))
            .collect();
        store.bulk_insert(&stored).await.unwrap();

        let mut hashes: Vec<String> = (0..HASH_LOOKUP_CHUNK + 10)
            .map(|i| balanced_rag_core::models::content_hash(&format!("absent {}", i)))
            .collect();
        hashes.push(stored[0].content_hash.clone());
        hashes.push(stored[2].content_hash.clone());

        let found = store.existing_hashes(&hashes).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&stored[0].content_hash));
        assert!(found.contains(&stored[2].content_hash));
        assert!(!found.contains(&stored[1].content_hash));
    }

    #[tokio::test]
    async fn test_source_stats_orders_by_size() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .bulk_insert(&[
                passage("lonely passage text", "small", vec![1.0]),
                passage("first big passage", "big", vec![1.0]),
                passage("second big passage", "big", vec![1.0]),
            ])
            .await
            .unwrap();

        let stats = store.source_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].source, "big");
        assert_eq!(stats[0].stored, 2);
        assert!(stats[0].last_insert.is_some());
        assert_eq!(stats[1].source, "small");
    }

    #[tokio::test]
    async fn test_locked_write_hits_deadline() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        // Hold the write lock so the next writer waits on SQLite's busy handler.
        let mut tx = store.pool().begin().await.unwrap();
        sqlx::query(
            "INSERT INTO passages (content_hash, source, text, embedding, dims, created_at) \
             VALUES ('h', 'a', 'held by another writer', x'', 0, 0)",
        )
        .execute(&mut *tx)
        .await
        .unwrap();

        let impatient = SqliteStore::new(store.pool().clone(), 100);
        let err = impatient
            .bulk_insert(&[passage("waiting for the lock", "a", vec![1.0])])
            .await
            .unwrap_err();
        assert!(
            matches!(err, RagError::UpstreamTimeout { timeout_ms: 100, .. }),
            "got {:?}",
            err
        );
        assert!(err.is_retriable());

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool_is_upstream_failure() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store.pool().close().await;

        let err = store.count().await.unwrap_err();
        assert!(matches!(err, RagError::UpstreamFailure { .. }));
    }
}
