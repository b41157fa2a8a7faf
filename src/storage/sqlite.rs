//! SQLite storage backend
//!
//! Single database file with the graph tables, an FTS5 index over note
//! bodies, the user tag registry, and the LLM audit log. Concurrency
//! model: WAL journaling, any number of readers, one logical writer.
//! The writer connection is guarded by a mutex; multi-statement commits
//! go through [`SqliteStore::with_writer`] so linker reads and edge
//! writes observe the same transaction.

use super::{map_sqlite_error, AuditRecord, AuditStats, FtsHit, StoreError, StoreResult};
use crate::config::EMBEDDING_DIMS;
use crate::extract::is_valid_tag;
use crate::graph::{Cluster, Edge, NoteId, NoteNode, Relation, TagRecord};
use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// How long a connection waits on a lock before reporting `Busy` (ms).
const BUSY_TIMEOUT_MS: u64 = 2_000;

/// SQLite-backed note graph store.
///
/// Separate writer/reader connections give concurrent readers while
/// writes serialize on the writer mutex.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// Set for throwaway stores; the files are removed on drop
    ephemeral: Option<std::path::PathBuf>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = Connection::open(path).map_err(map_sqlite_error)?;
        Self::configure(&writer)?;
        init_schema(&writer)?;
        let reader = Connection::open(path).map_err(map_sqlite_error)?;
        Self::configure(&reader)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            ephemeral: None,
        })
    }

    /// Create a throwaway store backed by a unique file in the system
    /// temp directory, removed when the store drops. Used by tests.
    ///
    /// A real file rather than `:memory:` so WAL applies and readers
    /// never block on the writer — the same concurrency model as
    /// production.
    pub fn open_temporary() -> StoreResult<Self> {
        let path = std::env::temp_dir().join(format!(
            "engram-{}.db",
            uuid::Uuid::new_v4().simple()
        ));
        let mut store = Self::open(&path)?;
        store.ephemeral = Some(path);
        Ok(store)
    }

    fn configure(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            BUSY_TIMEOUT_MS
        ))
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    /// Run a multi-statement commit on the writer connection.
    ///
    /// Everything the closure does — reads included — happens inside a
    /// single transaction; an `Err` rolls the whole commit back.
    pub fn with_writer<T>(
        &self,
        f: impl FnOnce(&WriterTxn<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.writer.lock().expect("writer lock poisoned");
        let txn = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let wrapper = WriterTxn { conn: &txn };
        let value = f(&wrapper)?;
        txn.commit().map_err(map_sqlite_error)?;
        Ok(value)
    }

    // === Single-statement writes ===

    /// Insert or update a node (plus its FTS row). Fails with
    /// `Conflict` when the stored version differs from `node.version`.
    pub fn put_node(&self, node: &NoteNode) -> StoreResult<i64> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let txn = conn.unchecked_transaction().map_err(map_sqlite_error)?;
        let version = put_node(&txn, node)?;
        txn.commit().map_err(map_sqlite_error)?;
        Ok(version)
    }

    /// Idempotent edge upsert on `(src, dst, relation)`.
    pub fn upsert_edge(&self, edge: &Edge) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        upsert_edge(&conn, edge)
    }

    /// Set just the embedding of an existing node.
    pub fn set_embedding(&self, id: &NoteId, embedding: &[f32]) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        set_embedding(&conn, id, embedding)
    }

    /// Delete a node; edges, tag links, FTS row and audit references go
    /// with it.
    pub fn cascade_delete(&self, id: &NoteId) -> StoreResult<bool> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let txn = conn.unchecked_transaction().map_err(map_sqlite_error)?;
        txn.execute("DELETE FROM notes_fts WHERE id = ?1", params![id.as_str()])
            .map_err(map_sqlite_error)?;
        let deleted = txn
            .execute("DELETE FROM graph_nodes WHERE id = ?1", params![id.as_str()])
            .map_err(map_sqlite_error)?;
        txn.commit().map_err(map_sqlite_error)?;
        Ok(deleted > 0)
    }

    /// Append one audit row.
    pub fn insert_audit(&self, record: &AuditRecord) -> StoreResult<i64> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        insert_audit(&conn, record)
    }

    /// Update title and summary of an existing cluster row.
    pub fn update_cluster_summary(&self, id: i64, title: &str, summary: &str) -> StoreResult<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        conn.execute(
            "UPDATE graph_clusters SET title = ?2, summary = ?3, updated = ?4 WHERE id = ?1",
            params![id, title, summary, chrono::Local::now().to_rfc3339()],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    // === Reads ===

    pub fn get_node(&self, id: &NoteId) -> StoreResult<Option<NoteNode>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        get_node(&conn, id)
    }

    /// All nodes, newest first.
    pub fn list_nodes(&self, limit: Option<usize>) -> StoreResult<Vec<NoteNode>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        list_nodes(&conn, limit)
    }

    /// Edges touching a node, optionally filtered by relation.
    pub fn get_edges(&self, id: &NoteId, relation: Option<Relation>) -> StoreResult<Vec<Edge>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        get_edges(&conn, id, relation)
    }

    pub fn all_edges(&self) -> StoreResult<Vec<Edge>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        all_edges(&conn)
    }

    /// All stored embeddings as `(id, vector)` pairs.
    pub fn load_embeddings(&self) -> StoreResult<Vec<(NoteId, Vec<f32>)>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        load_embeddings(&conn)
    }

    /// Full-text search with BM25 ranking and snippet extraction.
    ///
    /// `query` may contain `OR`/`AND`/quoted phrases; anything else is
    /// wrapped as a quoted phrase so stray FTS syntax cannot inject
    /// into the tokenizer.
    pub fn fts_search(
        &self,
        query: &str,
        limit: usize,
        status: Option<&str>,
    ) -> StoreResult<Vec<FtsHit>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        fts_search(&conn, query, limit, status)
    }

    pub fn list_clusters(&self) -> StoreResult<Vec<Cluster>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = conn
            .prepare("SELECT id, title, summary, size FROM graph_clusters ORDER BY size DESC")
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Cluster {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    size: row.get(3)?,
                })
            })
            .map_err(map_sqlite_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
    }

    pub fn list_tags(&self) -> StoreResult<Vec<TagRecord>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = conn
            .prepare("SELECT id, name, parent_id, level, use_count FROM tags ORDER BY name")
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TagRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                    level: row.get(3)?,
                    use_count: row.get(4)?,
                })
            })
            .map_err(map_sqlite_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
    }

    pub fn node_count(&self) -> StoreResult<i64> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        conn.query_row("SELECT COUNT(*) FROM graph_nodes", [], |row| row.get(0))
            .map_err(map_sqlite_error)
    }

    pub fn edge_count(&self) -> StoreResult<i64> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        conn.query_row("SELECT COUNT(*) FROM graph_edges", [], |row| row.get(0))
            .map_err(map_sqlite_error)
    }

    /// Aggregate statistics over the audit log.
    pub fn audit_stats(&self) -> StoreResult<AuditStats> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(duration_ms), 0.0),
                    COALESCE(MAX(duration_ms), 0),
                    COALESCE(SUM(tokens_input), 0),
                    COALESCE(SUM(tokens_output), 0)
             FROM llm_operations",
            [],
            |row| {
                Ok(AuditStats {
                    total_operations: row.get(0)?,
                    successful: row.get(1)?,
                    failed: row.get(2)?,
                    avg_duration_ms: row.get(3)?,
                    max_duration_ms: row.get(4)?,
                    total_tokens_input: row.get(5)?,
                    total_tokens_output: row.get(6)?,
                })
            },
        )
        .map_err(map_sqlite_error)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Some(path) = self.ephemeral.take() {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }
}

/// View over an open writer transaction.
///
/// Exposes the row operations a single commit needs; dropping without
/// commit (an `Err` from the closure) rolls everything back.
pub struct WriterTxn<'a> {
    conn: &'a rusqlite::Transaction<'a>,
}

impl WriterTxn<'_> {
    pub fn put_node(&self, node: &NoteNode) -> StoreResult<i64> {
        put_node(self.conn, node)
    }

    pub fn upsert_edge(&self, edge: &Edge) -> StoreResult<()> {
        upsert_edge(self.conn, edge)
    }

    pub fn get_node(&self, id: &NoteId) -> StoreResult<Option<NoteNode>> {
        get_node(self.conn, id)
    }

    pub fn list_nodes(&self, limit: Option<usize>) -> StoreResult<Vec<NoteNode>> {
        list_nodes(self.conn, limit)
    }

    pub fn load_embeddings(&self) -> StoreResult<Vec<(NoteId, Vec<f32>)>> {
        load_embeddings(self.conn)
    }

    pub fn set_embedding(&self, id: &NoteId, embedding: &[f32]) -> StoreResult<()> {
        set_embedding(self.conn, id, embedding)
    }

    /// Id of the chronological predecessor of `(created, id)`, if any.
    pub fn latest_before(
        &self,
        created: &DateTime<FixedOffset>,
        exclude: &NoteId,
    ) -> StoreResult<Option<NoteId>> {
        let created = created.to_rfc3339();
        self.conn
            .query_row(
                "SELECT id FROM graph_nodes
                 WHERE id != ?1 AND (created < ?2 OR (created = ?2 AND id < ?1))
                 ORDER BY created DESC, id DESC LIMIT 1",
                params![exclude.as_str(), created],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_sqlite_error)
            .map(|opt| opt.map(NoteId::from))
    }

    /// Register a note's tags in the tag hierarchy. Tags violating the
    /// grammar are dropped and recorded in the audit log; valid tags
    /// are returned.
    pub fn register_tags(&self, note_id: &NoteId, tags: &[String]) -> StoreResult<Vec<String>> {
        let mut kept = Vec::new();
        for tag in tags {
            if !is_valid_tag(tag) {
                tracing::warn!(%note_id, tag, "dropping invalid tag");
                insert_audit(
                    self.conn,
                    &AuditRecord {
                        id: None,
                        note_id: Some(note_id.clone()),
                        operation_type: "tag_import".to_string(),
                        created: chrono::Local::now().fixed_offset(),
                        model: String::new(),
                        duration_ms: 0,
                        tokens_input: None,
                        tokens_output: None,
                        prompt_text: String::new(),
                        raw_response: tag.clone(),
                        parsed_output: None,
                        error: Some(format!("invalid tag dropped: {}", tag)),
                        success: false,
                    },
                )?;
                continue;
            }
            let tag_id = self.ensure_tag_path(tag)?;
            let inserted = self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
                    params![note_id.as_str(), tag_id],
                )
                .map_err(map_sqlite_error)?;
            // Count a use only on first association, so re-linking a
            // note does not inflate the counter
            if inserted > 0 {
                self.conn
                    .execute(
                        "UPDATE tags SET use_count = use_count + 1 WHERE id = ?1",
                        params![tag_id],
                    )
                    .map_err(map_sqlite_error)?;
            }
            kept.push(tag.clone());
        }
        Ok(kept)
    }

    /// Create every level of a hierarchical tag (`a`, `a/b`, `a/b/c`)
    /// and return the id of the full path.
    fn ensure_tag_path(&self, tag: &str) -> StoreResult<i64> {
        let mut parent_id: Option<i64> = None;
        let mut path = String::new();
        let mut tag_id = 0;
        for (level, segment) in tag.split('/').enumerate() {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO tags (name, parent_id, level, use_count)
                     VALUES (?1, ?2, ?3, 0)",
                    params![path, parent_id, level as i64],
                )
                .map_err(map_sqlite_error)?;
            tag_id = self
                .conn
                .query_row("SELECT id FROM tags WHERE name = ?1", params![path], |row| {
                    row.get(0)
                })
                .map_err(map_sqlite_error)?;
            parent_id = Some(tag_id);
        }
        Ok(tag_id)
    }

    /// Assign cluster ids to nodes and replace the cluster table in one
    /// sweep. Cluster rows are written before node assignments so a
    /// node never points at a missing cluster.
    pub fn replace_clusters(
        &self,
        clusters: &[Cluster],
        assignments: &[(NoteId, i64)],
    ) -> StoreResult<()> {
        self.conn
            .execute("UPDATE graph_nodes SET cluster_id = NULL", [])
            .map_err(map_sqlite_error)?;
        self.conn
            .execute("DELETE FROM graph_clusters", [])
            .map_err(map_sqlite_error)?;
        let now = chrono::Local::now().to_rfc3339();
        for cluster in clusters {
            self.conn
                .execute(
                    "INSERT INTO graph_clusters (id, title, summary, size, created, updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![cluster.id, cluster.title, cluster.summary, cluster.size, now],
                )
                .map_err(map_sqlite_error)?;
        }
        for (id, cluster_id) in assignments {
            self.conn
                .execute(
                    "UPDATE graph_nodes SET cluster_id = ?2 WHERE id = ?1",
                    params![id.as_str(), cluster_id],
                )
                .map_err(map_sqlite_error)?;
        }
        Ok(())
    }

    pub fn insert_audit(&self, record: &AuditRecord) -> StoreResult<i64> {
        insert_audit(self.conn, record)
    }
}

// === Schema ===

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            title TEXT NOT NULL,
            file_path TEXT NOT NULL,
            created TEXT NOT NULL,
            entities_who TEXT NOT NULL DEFAULT '[]',
            entities_what TEXT NOT NULL DEFAULT '[]',
            entities_where TEXT NOT NULL DEFAULT '[]',
            time_references TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            prospective TEXT NOT NULL DEFAULT '[]',
            embedding BLOB,
            cluster_id INTEGER,
            status TEXT,
            needs_review INTEGER NOT NULL DEFAULT 0,
            review_reason TEXT,
            version INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_created ON graph_nodes(created);
        CREATE INDEX IF NOT EXISTS idx_nodes_cluster ON graph_nodes(cluster_id);

        -- entity_type discriminates entity_link edges per subtype
        -- (who/what/where); it is '' for every other relation, so the
        -- logical identity stays (src, dst, relation).
        CREATE TABLE IF NOT EXISTS graph_edges (
            src_node_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
            dst_node_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
            relation TEXT NOT NULL,
            entity_type TEXT NOT NULL DEFAULT '',
            weight REAL NOT NULL,
            metadata TEXT,
            created TEXT NOT NULL,
            PRIMARY KEY (src_node_id, dst_node_id, relation, entity_type)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_src ON graph_edges(src_node_id);
        CREATE INDEX IF NOT EXISTS idx_edges_dst ON graph_edges(dst_node_id);
        CREATE INDEX IF NOT EXISTS idx_edges_relation ON graph_edges(relation);

        CREATE TABLE IF NOT EXISTS graph_clusters (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            size INTEGER NOT NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES tags(id),
            level INTEGER NOT NULL,
            use_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS note_tags (
            note_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (note_id, tag_id)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts
            USING fts5(id UNINDEXED, title, body, tags);

        CREATE TABLE IF NOT EXISTS llm_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            note_id TEXT REFERENCES graph_nodes(id) ON DELETE CASCADE,
            operation_type TEXT NOT NULL,
            created TEXT NOT NULL,
            model TEXT NOT NULL,
            duration_ms INTEGER,
            tokens_input INTEGER,
            tokens_output INTEGER,
            prompt_text TEXT,
            raw_response TEXT,
            parsed_output TEXT,
            error TEXT,
            success INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_llm_ops_note ON llm_operations(note_id);
        CREATE INDEX IF NOT EXISTS idx_llm_ops_type ON llm_operations(operation_type);
        CREATE INDEX IF NOT EXISTS idx_llm_ops_created ON llm_operations(created);
        "#,
    )
    .map_err(map_sqlite_error)?;
    Ok(())
}

// === Row operations (shared between store and transaction view) ===

fn put_node(conn: &Connection, node: &NoteNode) -> StoreResult<i64> {
    let embedding_blob = match &node.embedding {
        Some(vec) => Some(embedding_to_blob(vec)?),
        None => None,
    };
    let who = serde_json::to_string(&node.who)?;
    let what = serde_json::to_string(&node.what)?;
    let where_ = serde_json::to_string(&node.where_)?;
    let when = serde_json::to_string(&node.when)?;
    let tags = serde_json::to_string(&node.tags)?;
    let prospective = serde_json::to_string(&node.prospective)?;
    let created = node.created.to_rfc3339();

    let existing: Option<i64> = conn
        .query_row(
            "SELECT version FROM graph_nodes WHERE id = ?1",
            params![node.id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_error)?;

    let new_version = match existing {
        None => {
            conn.execute(
                "INSERT INTO graph_nodes (
                    id, text, title, file_path, created,
                    entities_who, entities_what, entities_where,
                    time_references, tags, prospective,
                    embedding, cluster_id, status, needs_review, review_reason, version
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 1)",
                params![
                    node.id.as_str(),
                    node.text,
                    node.title,
                    node.file_path,
                    created,
                    who,
                    what,
                    where_,
                    when,
                    tags,
                    prospective,
                    embedding_blob,
                    node.cluster_id,
                    node.status,
                    node.needs_review as i64,
                    node.review_reason,
                ],
            )
            .map_err(map_sqlite_error)?;
            1
        }
        Some(version) => {
            if version != node.version {
                return Err(StoreError::Conflict(node.id.clone()));
            }
            conn.execute(
                "UPDATE graph_nodes SET
                    text = ?2, title = ?3, file_path = ?4, created = ?5,
                    entities_who = ?6, entities_what = ?7, entities_where = ?8,
                    time_references = ?9, tags = ?10, prospective = ?11,
                    embedding = ?12, cluster_id = ?13, status = ?14,
                    needs_review = ?15, review_reason = ?16, version = version + 1
                 WHERE id = ?1",
                params![
                    node.id.as_str(),
                    node.text,
                    node.title,
                    node.file_path,
                    created,
                    who,
                    what,
                    where_,
                    when,
                    tags,
                    prospective,
                    embedding_blob,
                    node.cluster_id,
                    node.status,
                    node.needs_review as i64,
                    node.review_reason,
                ],
            )
            .map_err(map_sqlite_error)?;
            version + 1
        }
    };

    // Keep the FTS row in step with the node
    conn.execute(
        "DELETE FROM notes_fts WHERE id = ?1",
        params![node.id.as_str()],
    )
    .map_err(map_sqlite_error)?;
    conn.execute(
        "INSERT INTO notes_fts (id, title, body, tags) VALUES (?1, ?2, ?3, ?4)",
        params![node.id.as_str(), node.title, node.text, node.tags.join(",")],
    )
    .map_err(map_sqlite_error)?;

    Ok(new_version)
}

fn get_node(conn: &Connection, id: &NoteId) -> StoreResult<Option<NoteNode>> {
    let result = conn
        .query_row(
            &format!("{} WHERE id = ?1", NODE_SELECT),
            params![id.as_str()],
            row_to_node,
        )
        .optional()
        .map_err(map_sqlite_error)?;
    result.transpose()
}

fn list_nodes(conn: &Connection, limit: Option<usize>) -> StoreResult<Vec<NoteNode>> {
    let sql = match limit {
        Some(n) => format!("{} ORDER BY created DESC, id DESC LIMIT {}", NODE_SELECT, n),
        None => format!("{} ORDER BY created DESC, id DESC", NODE_SELECT),
    };
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
    let rows = stmt.query_map([], row_to_node).map_err(map_sqlite_error)?;
    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row.map_err(map_sqlite_error)??);
    }
    Ok(nodes)
}

const NODE_SELECT: &str = "SELECT id, text, title, file_path, created,
    entities_who, entities_what, entities_where, time_references, tags,
    prospective, embedding, cluster_id, status, needs_review, review_reason, version
    FROM graph_nodes";

type NodeRow = Result<NoteNode, StoreError>;

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    let id: String = row.get(0)?;
    let text: String = row.get(1)?;
    let title: String = row.get(2)?;
    let file_path: String = row.get(3)?;
    let created: String = row.get(4)?;
    let who: String = row.get(5)?;
    let what: String = row.get(6)?;
    let where_: String = row.get(7)?;
    let when: String = row.get(8)?;
    let tags: String = row.get(9)?;
    let prospective: String = row.get(10)?;
    let embedding: Option<Vec<u8>> = row.get(11)?;
    let cluster_id: Option<i64> = row.get(12)?;
    let status: Option<String> = row.get(13)?;
    let needs_review: i64 = row.get(14)?;
    let review_reason: Option<String> = row.get(15)?;
    let version: i64 = row.get(16)?;

    let build = || -> Result<NoteNode, StoreError> {
        Ok(NoteNode {
            id: NoteId::from(id),
            text,
            title,
            file_path,
            created: DateTime::parse_from_rfc3339(&created).map_err(|e| {
                StoreError::NotFound(format!("unparseable created timestamp: {}", e))
            })?,
            who: serde_json::from_str(&who)?,
            what: serde_json::from_str(&what)?,
            where_: serde_json::from_str(&where_)?,
            when: serde_json::from_str(&when)?,
            tags: serde_json::from_str(&tags)?,
            prospective: serde_json::from_str(&prospective)?,
            embedding: embedding.map(|blob| blob_to_embedding(&blob)).transpose()?,
            cluster_id,
            status,
            needs_review: needs_review != 0,
            review_reason,
            version,
        })
    };
    Ok(build())
}

fn upsert_edge(conn: &Connection, edge: &Edge) -> StoreResult<()> {
    let metadata = edge
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let entity_type = edge
        .metadata
        .as_ref()
        .and_then(|m| m.get("entity_type"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    conn.execute(
        "INSERT INTO graph_edges
            (src_node_id, dst_node_id, relation, entity_type, weight, metadata, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(src_node_id, dst_node_id, relation, entity_type)
         DO UPDATE SET weight = excluded.weight, metadata = excluded.metadata",
        params![
            edge.src.as_str(),
            edge.dst.as_str(),
            edge.relation.as_str(),
            entity_type,
            edge.weight,
            metadata,
            edge.created.to_rfc3339(),
        ],
    )
    .map_err(map_sqlite_error)?;
    Ok(())
}

fn get_edges(conn: &Connection, id: &NoteId, relation: Option<Relation>) -> StoreResult<Vec<Edge>> {
    let base = "SELECT src_node_id, dst_node_id, relation, weight, metadata, created
                FROM graph_edges WHERE (src_node_id = ?1 OR dst_node_id = ?1)";
    let mut edges = Vec::new();
    let mut collect = |stmt: &mut rusqlite::Statement<'_>,
                       params: &[&dyn rusqlite::ToSql]|
     -> StoreResult<()> {
        let rows = stmt.query_map(params, row_to_edge).map_err(map_sqlite_error)?;
        for row in rows {
            edges.push(row.map_err(map_sqlite_error)??);
        }
        Ok(())
    };
    match relation {
        Some(rel) => {
            let mut stmt = conn
                .prepare(&format!("{} AND relation = ?2 ORDER BY created DESC", base))
                .map_err(map_sqlite_error)?;
            collect(&mut stmt, &[&id.as_str(), &rel.as_str()])?;
        }
        None => {
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY created DESC", base))
                .map_err(map_sqlite_error)?;
            collect(&mut stmt, &[&id.as_str()])?;
        }
    }
    Ok(edges)
}

fn all_edges(conn: &Connection) -> StoreResult<Vec<Edge>> {
    let mut stmt = conn
        .prepare(
            "SELECT src_node_id, dst_node_id, relation, weight, metadata, created
             FROM graph_edges ORDER BY src_node_id, dst_node_id, relation",
        )
        .map_err(map_sqlite_error)?;
    let rows = stmt.query_map([], row_to_edge).map_err(map_sqlite_error)?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(row.map_err(map_sqlite_error)??);
    }
    Ok(edges)
}

type EdgeRow = Result<Edge, StoreError>;

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
    let src: String = row.get(0)?;
    let dst: String = row.get(1)?;
    let relation: String = row.get(2)?;
    let weight: f64 = row.get(3)?;
    let metadata: Option<String> = row.get(4)?;
    let created: String = row.get(5)?;

    let build = || -> Result<Edge, StoreError> {
        Ok(Edge {
            src: NoteId::from(src),
            dst: NoteId::from(dst),
            relation: Relation::from_str(&relation).map_err(StoreError::NotFound)?,
            weight,
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            created: DateTime::parse_from_rfc3339(&created).map_err(|e| {
                StoreError::NotFound(format!("unparseable edge timestamp: {}", e))
            })?,
        })
    };
    Ok(build())
}

fn set_embedding(conn: &Connection, id: &NoteId, embedding: &[f32]) -> StoreResult<()> {
    let blob = embedding_to_blob(embedding)?;
    let updated = conn
        .execute(
            "UPDATE graph_nodes SET embedding = ?2 WHERE id = ?1",
            params![id.as_str(), blob],
        )
        .map_err(map_sqlite_error)?;
    if updated == 0 {
        return Err(StoreError::NotFound(id.as_str().to_string()));
    }
    Ok(())
}

fn load_embeddings(conn: &Connection) -> StoreResult<Vec<(NoteId, Vec<f32>)>> {
    let mut stmt = conn
        .prepare("SELECT id, embedding FROM graph_nodes WHERE embedding IS NOT NULL ORDER BY id")
        .map_err(map_sqlite_error)?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob))
        })
        .map_err(map_sqlite_error)?;
    let mut result = Vec::new();
    for row in rows {
        let (id, blob) = row.map_err(map_sqlite_error)?;
        result.push((NoteId::from(id), blob_to_embedding(&blob)?));
    }
    Ok(result)
}

fn fts_search(
    conn: &Connection,
    query: &str,
    limit: usize,
    status: Option<&str>,
) -> StoreResult<Vec<FtsHit>> {
    let fts_query = wrap_fts_query(query);
    let base = "SELECT n.id, n.file_path,
                       snippet(notes_fts, 2, '<b>', '</b>', '…', 8),
                       bm25(notes_fts)
                FROM notes_fts
                JOIN graph_nodes n ON n.id = notes_fts.id
                WHERE notes_fts MATCH ?1";
    let map = |row: &rusqlite::Row<'_>| {
        Ok(FtsHit {
            id: NoteId::from(row.get::<_, String>(0)?),
            path: row.get(1)?,
            snippet: row.get(2)?,
            bm25: row.get(3)?,
        })
    };
    let run = |stmt: &mut rusqlite::Statement<'_>,
               params: &[&dyn rusqlite::ToSql]|
     -> StoreResult<Vec<FtsHit>> {
        let rows = stmt.query_map(params, map).map_err(map_sqlite_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
    };
    let result = match status {
        Some(status) => {
            let sql = format!(
                "{} AND n.status = ?2 ORDER BY bm25(notes_fts) LIMIT ?3",
                base
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            run(&mut stmt, &[&fts_query, &status, &(limit as i64)])
        }
        None => {
            let sql = format!("{} ORDER BY bm25(notes_fts) LIMIT ?2", base);
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            run(&mut stmt, &[&fts_query, &(limit as i64)])
        }
    };
    // Queries the FTS5 parser rejects count as "no matches", not errors
    match result {
        Ok(hits) => Ok(hits),
        Err(StoreError::Database(rusqlite::Error::SqliteFailure(_, Some(msg))))
            if msg.contains("fts5") =>
        {
            Ok(Vec::new())
        }
        Err(other) => Err(other),
    }
}

/// Pass boolean/phrase queries through untouched; wrap anything else as
/// a quoted phrase so user text cannot inject FTS5 syntax.
fn wrap_fts_query(query: &str) -> String {
    if query.contains(" OR ") || query.contains(" AND ") || query.starts_with('"') {
        query.to_string()
    } else {
        format!("\"{}\"", query.replace('"', "\"\""))
    }
}

fn insert_audit(conn: &Connection, record: &AuditRecord) -> StoreResult<i64> {
    let parsed = record
        .parsed_output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO llm_operations (
            note_id, operation_type, created, model, duration_ms,
            tokens_input, tokens_output, prompt_text, raw_response,
            parsed_output, error, success
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.note_id.as_ref().map(|id| id.as_str()),
            record.operation_type,
            record.created.to_rfc3339(),
            record.model,
            record.duration_ms,
            record.tokens_input,
            record.tokens_output,
            record.prompt_text,
            record.raw_response,
            parsed,
            record.error,
            record.success as i64,
        ],
    )
    .map_err(map_sqlite_error)?;
    Ok(conn.last_insert_rowid())
}

// === Embedding blobs ===

/// Serialize a 384-dim vector as 1536 little-endian bytes.
fn embedding_to_blob(embedding: &[f32]) -> StoreResult<Vec<u8>> {
    if embedding.len() != EMBEDDING_DIMS {
        return Err(StoreError::InvalidEmbedding(embedding.len()));
    }
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    Ok(blob)
}

fn blob_to_embedding(blob: &[u8]) -> StoreResult<Vec<f32>> {
    if blob.len() != EMBEDDING_DIMS * 4 {
        return Err(StoreError::InvalidEmbedding(blob.len() / 4));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
