//! Embedded vector store over a single SQLite database.
//!
//! One `entries` table holds, per conversation entry: the full metadata
//! record as JSON (every schema field — storing provenance only is the
//! regression this layer exists to prevent), the raw embedding as a
//! little-endian f32 BLOB, and mirrored scalar columns for the fields that
//! filters touch. A `meta` table pins schema version, embedding model
//! identity and content-hash algorithm; any mismatch on reopen is structural
//! and demands a rebuild rather than a silent re-embedding.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, warn};

use engram_core::{CONTENT_HASH_ALGORITHM, Entry};
use engram_embedding::{EncoderHandle, TextEncoder};

use crate::error::StoreError;
use crate::filter::MetadataFilter;
use crate::patch::MetadataPatch;

const SCHEMA_VERSION: i64 = 1;

const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS entries (
    id                    TEXT PRIMARY KEY,
    session_id            TEXT NOT NULL,
    role                  TEXT NOT NULL,
    project_name          TEXT NOT NULL,
    content_hash          TEXT NOT NULL,
    position              INTEGER NOT NULL,
    timestamp_unix        INTEGER NOT NULL,
    primary_topic         TEXT NOT NULL DEFAULT '',
    has_code              INTEGER NOT NULL DEFAULT 0,
    is_solution_attempt   INTEGER NOT NULL DEFAULT 0,
    is_validated_solution INTEGER NOT NULL DEFAULT 0,
    is_refuted_attempt    INTEGER NOT NULL DEFAULT 0,
    backfill_processed    INTEGER NOT NULL DEFAULT 0,
    content               TEXT NOT NULL,
    metadata              TEXT NOT NULL,
    embedding             BLOB NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_dedup
    ON entries(session_id, content_hash, role, position);
CREATE INDEX IF NOT EXISTS idx_entries_session
    ON entries(session_id, position, timestamp_unix);
CREATE INDEX IF NOT EXISTS idx_entries_project
    ON entries(project_name);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const UPSERT_SQL: &str = "
INSERT INTO entries (
    id, session_id, role, project_name, content_hash, position,
    timestamp_unix, primary_topic, has_code, is_solution_attempt,
    is_validated_solution, is_refuted_attempt, backfill_processed,
    content, metadata, embedding
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
ON CONFLICT(id) DO UPDATE SET
    primary_topic         = excluded.primary_topic,
    has_code              = excluded.has_code,
    is_solution_attempt   = excluded.is_solution_attempt,
    is_validated_solution = excluded.is_validated_solution,
    is_refuted_attempt    = excluded.is_refuted_attempt,
    backfill_processed    = excluded.backfill_processed,
    metadata              = excluded.metadata,
    embedding             = excluded.embedding
";

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub entry: Entry,
    /// Cosine distance in [0, 2]; 0 is an identical direction.
    pub distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total: usize,
    pub users: usize,
    pub assistants: usize,
    pub sessions: usize,
    pub solution_attempts: usize,
    pub validated_solutions: usize,
    pub refuted_attempts: usize,
    pub backfill_processed: usize,
    pub with_primary_topic: usize,
}

/// Single-writer adapter over the embedded database. All mutation and reads
/// go through one connection behind a mutex; multi-step operations run in
/// SQLite transactions so cancellation never leaves a half-written batch.
pub struct ConversationStore {
    conn: Mutex<Connection>,
    encoder: Arc<dyn TextEncoder>,
    batch_size: usize,
    path: PathBuf,
}

impl ConversationStore {
    pub fn open(
        dir: impl AsRef<Path>,
        encoder: Arc<dyn TextEncoder>,
        batch_size: usize,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Transient(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join("entries.db");

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(CREATE_SQL)?;

        let store = Self {
            conn: Mutex::new(conn),
            encoder,
            batch_size: batch_size.max(1),
            path,
        };
        store.check_compatibility()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoder_handle(&self) -> EncoderHandle {
        EncoderHandle::of(self.encoder.as_ref())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Transient("store connection mutex poisoned".into()))
    }

    /// Pin or verify schema version, embedding model identity and the content
    /// hash algorithm. Vectors written under a different model are invalid
    /// for distance computation, so a mismatch is structural.
    fn check_compatibility(&self) -> Result<(), StoreError> {
        let handle = self.encoder_handle();
        let conn = self.lock()?;

        let expect = [
            ("schema_version", SCHEMA_VERSION.to_string()),
            ("model_id", handle.model_id.clone()),
            ("dimension", handle.dimension.to_string()),
            ("hash_algorithm", CONTENT_HASH_ALGORITHM.to_string()),
        ];
        for (key, wanted) in expect {
            let stored: Option<String> = conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            match stored {
                None => {
                    conn.execute(
                        "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                        params![key, wanted],
                    )?;
                }
                Some(found) if found == wanted => {}
                Some(found) => {
                    return Err(StoreError::Structural(format!(
                        "store {key} is '{found}' but this build expects '{wanted}'; \
                         a full rebuild is required"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Write a batch of entries, chunked to the configured batch size, with
    /// embeddings computed through the shared encoder. A duplicate id within
    /// the submitted batch is a structural error before anything is written;
    /// a re-upsert of an existing id refreshes derived metadata in place.
    pub fn upsert_many(&self, entries: &[Entry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(StoreError::Structural(format!(
                    "duplicate id '{}' within one upsert batch",
                    entry.id
                )));
            }
        }

        let dimension = self.encoder.dimension();
        let mut written = 0usize;
        for chunk in entries.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|e| e.content.clone()).collect();
            let vectors = self
                .encoder
                .encode_batch(&texts)
                .map_err(|e| StoreError::Transient(format!("embedding batch: {e}")))?;
            if vectors.len() != chunk.len() {
                return Err(StoreError::Structural(format!(
                    "encoder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }

            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                for (entry, vector) in chunk.iter().zip(&vectors) {
                    if vector.len() != dimension {
                        return Err(StoreError::Structural(format!(
                            "embedding dimension {} != expected {dimension}",
                            vector.len()
                        )));
                    }
                    let metadata = serde_json::to_string(entry)?;
                    stmt.execute(params![
                        entry.id,
                        entry.session_id,
                        entry.role.as_str(),
                        entry.project_name,
                        entry.content_hash,
                        entry.message_sequence_position as i64,
                        entry.timestamp_unix,
                        entry.primary_topic,
                        entry.has_code,
                        entry.is_solution_attempt,
                        entry.is_validated_solution,
                        entry.is_refuted_attempt,
                        entry.backfill_processed,
                        entry.content,
                        metadata,
                        vector_to_blob(vector),
                    ])?;
                }
            }
            tx.commit()?;
            written += chunk.len();
            debug!(chunk = chunk.len(), written, "upsert chunk committed");
        }
        Ok(written)
    }

    /// k-NN under a metadata pre-filter: SQL narrows the candidate set, then
    /// cosine distance ranks the survivors. Ties break on recency then id so
    /// the ordering is reproducible.
    pub fn query(
        &self,
        text: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryHit>, StoreError> {
        let query_vec = self
            .encoder
            .encode_one(text)
            .map_err(|e| StoreError::Transient(format!("embedding query: {e}")))?;

        let (clause, values) = filter.sql();
        let sql = format!(
            "SELECT metadata, embedding, timestamp_unix, id FROM entries WHERE {clause}"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut hits: Vec<(QueryHit, i64, String)> = Vec::new();
        for row in rows {
            let (metadata, blob, ts, id) = row?;
            let entry: Entry = serde_json::from_str(&metadata)?;
            let vector = blob_to_vector(&blob)?;
            let distance = cosine_distance(&query_vec, &vector);
            hits.push((QueryHit { entry, distance }, ts, id));
        }

        hits.sort_by(|(a, a_ts, a_id), (b, b_ts, b_id)| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| b_ts.cmp(a_ts))
                .then_with(|| a_id.cmp(b_id))
        });
        hits.truncate(k);
        Ok(hits.into_iter().map(|(hit, _, _)| hit).collect())
    }

    /// Atomic per-id metadata patch: the JSON record and the mirrored filter
    /// columns change in one transaction or not at all.
    pub fn update_metadata(&self, id: &str, patch: &MetadataPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let metadata: Option<String> = tx
            .query_row("SELECT metadata FROM entries WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(metadata) = metadata else {
            return Err(StoreError::Structural(format!(
                "update_metadata: unknown entry id '{id}'"
            )));
        };

        let mut entry: Entry = serde_json::from_str(&metadata)?;
        patch.apply(&mut entry)?;
        let updated = serde_json::to_string(&entry)?;

        tx.execute(
            "UPDATE entries SET
                metadata = ?1,
                position = ?2,
                is_validated_solution = ?3,
                is_refuted_attempt = ?4,
                backfill_processed = ?5
             WHERE id = ?6",
            params![
                updated,
                entry.message_sequence_position as i64,
                entry.is_validated_solution,
                entry.is_refuted_attempt,
                entry.backfill_processed,
                id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Recovery operation: remove entries matching a metadata predicate.
    /// Refuses the empty filter so a bug cannot silently wipe the store.
    pub fn delete_where(&self, filter: &MetadataFilter) -> Result<usize, StoreError> {
        if filter.is_empty() {
            return Err(StoreError::Structural(
                "delete_where refuses an unfiltered delete".into(),
            ));
        }
        let (clause, values) = filter.sql();
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM entries WHERE {clause}"),
            params_from_iter(values),
        )?;
        if deleted > 0 {
            warn!(deleted, "entries removed by delete_where");
        }
        Ok(deleted)
    }

    /// Remove entries that violate the identity/content invariants. These can
    /// only exist if an older writer bypassed normalisation.
    pub fn delete_corrupt(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM entries WHERE id = '' OR id = 'unknown' OR content = ''",
            [],
        )?;
        if deleted > 0 {
            info!(deleted, alert_type = "corruption_cleanup", "corrupt entries removed");
        }
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM entries WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, id: &str) -> Result<Option<Entry>, StoreError> {
        let conn = self.lock()?;
        let metadata: Option<String> = conn
            .query_row("SELECT metadata FROM entries WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        metadata
            .map(|m| serde_json::from_str(&m).map_err(StoreError::from))
            .transpose()
    }

    /// All entries of one session in stable transcript order.
    pub fn entries_for_session(&self, session_id: &str) -> Result<Vec<Entry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT metadata FROM entries WHERE session_id = ?1
             ORDER BY position ASC, timestamp_unix ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(serde_json::from_str(&row?)?);
        }
        Ok(entries)
    }

    /// Content hashes already stored for a session, for incremental dedup.
    pub fn session_hashes(&self, session_id: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT content_hash FROM entries WHERE session_id = ?1")?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut hashes = HashSet::new();
        for row in rows {
            hashes.insert(row?);
        }
        Ok(hashes)
    }

    pub fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM entries ORDER BY session_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Sessions whose newest entry is at or before `cutoff_unix` — the ones
    /// considered complete enough for an unattended back-fill pass.
    pub fn sessions_quiet_since(&self, cutoff_unix: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM entries GROUP BY session_id
             HAVING MAX(timestamp_unix) <= ?1 ORDER BY session_id",
        )?;
        let rows = stmt.query_map(params![cutoff_unix], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(role = 'user'), 0),
                    COALESCE(SUM(role = 'assistant'), 0),
                    COUNT(DISTINCT session_id),
                    COALESCE(SUM(is_solution_attempt), 0),
                    COALESCE(SUM(is_validated_solution), 0),
                    COALESCE(SUM(is_refuted_attempt), 0),
                    COALESCE(SUM(backfill_processed), 0),
                    COALESCE(SUM(primary_topic != ''), 0)
             FROM entries",
            [],
            |row| {
                Ok(StoreStats {
                    total: row.get::<_, i64>(0)? as usize,
                    users: row.get::<_, i64>(1)? as usize,
                    assistants: row.get::<_, i64>(2)? as usize,
                    sessions: row.get::<_, i64>(3)? as usize,
                    solution_attempts: row.get::<_, i64>(4)? as usize,
                    validated_solutions: row.get::<_, i64>(5)? as usize,
                    refuted_attempts: row.get::<_, i64>(6)? as usize,
                    backfill_processed: row.get::<_, i64>(7)? as usize,
                    with_primary_topic: row.get::<_, i64>(8)? as usize,
                })
            },
        )
        .map_err(StoreError::from)
    }
}

// ── vector codec ──────────────────────────────────────────────────────────────

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Structural(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes(b.try_into().expect("chunk is 4 bytes")))
        .collect())
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 2.0;
    }
    (1.0 - dot / (mag_a * mag_b)).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use engram_core::{FeedbackSentiment, Role, entry_id};
    use engram_embedding::HashedEncoder;

    use super::*;

    fn test_store(dir: &Path) -> ConversationStore {
        ConversationStore::open(dir, Arc::new(HashedEncoder::default()), 10).unwrap()
    }

    fn entry(session: &str, seq: usize, role: Role, content: &str) -> Entry {
        Entry::new(
            entry_id(session, seq, role),
            format!("hash-{session}-{seq}"),
            session.to_string(),
            format!("{session}.jsonl"),
            "/home/u/projA".into(),
            "projA".into(),
            "2025-06-01T12:00:00Z".into(),
            1_748_779_200 + seq as i64,
            content.to_string(),
            role,
            seq,
        )
    }

    #[test]
    fn upsert_then_get_roundtrips_full_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());

        let mut e = entry("s1", 0, Role::Assistant, "try cargo clean first");
        e.primary_topic = "debugging".into();
        e.detected_topics.insert("debugging".into(), 0.5);
        e.is_solution_attempt = true;
        store.upsert_many(std::slice::from_ref(&e))?;

        let stored = store.get(&e.id)?.expect("entry present");
        assert_eq!(stored, e);
        assert_eq!(stored.primary_topic, "debugging");
        assert!(stored.is_solution_attempt);
        Ok(())
    }

    #[test]
    fn reupsert_same_id_does_not_duplicate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let e = entry("s1", 0, Role::User, "hello there");

        store.upsert_many(std::slice::from_ref(&e))?;
        store.upsert_many(std::slice::from_ref(&e))?;
        assert_eq!(store.count()?, 1);
        Ok(())
    }

    #[test]
    fn duplicate_id_within_batch_is_structural() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let e = entry("s1", 0, Role::User, "hello");

        let err = store.upsert_many(&[e.clone(), e]).unwrap_err();
        assert!(matches!(err, StoreError::Structural(_)));
        assert_eq!(store.count()?, 0);
        Ok(())
    }

    #[test]
    fn colliding_dedup_tuple_under_new_id_is_structural() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let a = entry("s1", 0, Role::User, "hello");
        let mut b = a.clone();
        b.id = entry_id("s1", 99, Role::User);
        // Same (session, hash, role, position) tuple as `a`.
        store.upsert_many(std::slice::from_ref(&a))?;
        let err = store.upsert_many(std::slice::from_ref(&b)).unwrap_err();
        assert!(matches!(err, StoreError::Structural(_)));
        Ok(())
    }

    #[test]
    fn query_honours_metadata_filter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());

        let mut a = entry("s1", 0, Role::Assistant, "the fix for the build error");
        a.is_validated_solution = true;
        let b = entry("s1", 1, Role::Assistant, "the fix for the build error again");
        store.upsert_many(&[a.clone(), b])?;

        let filter = MetadataFilter {
            is_validated_solution: Some(true),
            ..Default::default()
        };
        let hits = store.query("build error fix", 10, &filter)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, a.id);
        Ok(())
    }

    #[test]
    fn query_ranks_similar_content_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());

        let near = entry("s1", 0, Role::Assistant, "cargo build failed with linker error");
        let far = entry("s1", 1, Role::Assistant, "recipe for tomato soup and bread");
        store.upsert_many(&[near.clone(), far])?;

        let hits = store.query("cargo build linker error", 2, &MetadataFilter::default())?;
        assert_eq!(hits[0].entry.id, near.id);
        assert!(hits[0].distance < hits[1].distance);
        Ok(())
    }

    #[test]
    fn update_metadata_patches_atomically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let e = entry("s1", 0, Role::Assistant, "some assistant reply");
        store.upsert_many(std::slice::from_ref(&e))?;

        let patch = MetadataPatch {
            next_message_id: Some(entry_id("s1", 1, Role::User)),
            user_feedback_sentiment: Some(FeedbackSentiment::Positive),
            backfill_processed: Some(true),
            ..Default::default()
        };
        store.update_metadata(&e.id, &patch)?;

        let stored = store.get(&e.id)?.unwrap();
        assert_eq!(stored.next_message_id, entry_id("s1", 1, Role::User));
        assert_eq!(stored.user_feedback_sentiment, FeedbackSentiment::Positive);
        assert!(stored.backfill_processed);
        // Immutable fields untouched.
        assert_eq!(stored.content, e.content);
        assert_eq!(stored.content_hash, e.content_hash);
        Ok(())
    }

    #[test]
    fn delete_where_refuses_empty_filter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let err = store.delete_where(&MetadataFilter::default()).unwrap_err();
        assert!(matches!(err, StoreError::Structural(_)));
        Ok(())
    }

    #[test]
    fn reopen_with_different_model_is_structural() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let _store = test_store(dir.path());
        }
        let other = Arc::new(HashedEncoder::new(128));
        let err = ConversationStore::open(dir.path(), other, 10).unwrap_err();
        assert!(matches!(err, StoreError::Structural(_)));
        Ok(())
    }

    #[test]
    fn session_listing_is_ordered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let entries = vec![
            entry("s1", 2, Role::User, "third"),
            entry("s1", 0, Role::User, "first"),
            entry("s1", 1, Role::Assistant, "second"),
        ];
        store.upsert_many(&entries)?;

        let ordered = store.entries_for_session("s1")?;
        let positions: Vec<usize> =
            ordered.iter().map(|e| e.message_sequence_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn quiet_sessions_exclude_recently_active_ones() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        let old = entry("s-old", 0, Role::User, "an old question");
        let mut fresh = entry("s-new", 0, Role::User, "a fresh question");
        fresh.timestamp_unix = 1_900_000_000;
        store.upsert_many(&[old, fresh])?;

        let quiet = store.sessions_quiet_since(1_800_000_000)?;
        assert_eq!(quiet, vec!["s-old".to_string()]);
        Ok(())
    }

    #[test]
    fn stats_count_per_role_and_session() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = test_store(dir.path());
        store.upsert_many(&[
            entry("s1", 0, Role::User, "question one"),
            entry("s1", 1, Role::Assistant, "answer one"),
            entry("s2", 0, Role::User, "question two"),
        ])?;

        let stats = store.stats()?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.users, 2);
        assert_eq!(stats.assistants, 1);
        assert_eq!(stats.sessions, 2);
        Ok(())
    }
}
