//! Target Store
//!
//! The export-format database. One is created fresh per export at a
//! temporary path, written to exclusively by the pipeline, and copied into
//! durable storage only after the transform completes, so consumers never
//! observe a partial database.
//!
//! Node upserts are keyed by source node id: re-running a transform over
//! the same tree updates rows in place instead of duplicating them.
//!
//! `begin_bulk_load` / `end_bulk_load` bracket the tree walk: secondary
//! indexes are dropped for the duration of the bulk insert phase and
//! rebuilt once at the end, which keeps maintenance cost linear over large
//! trees.

use crate::db::error::DatabaseError;
use crate::models::{ContentTag, Language, TargetChannel, TargetFile, TargetNode};
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const SECONDARY_INDEXES: [(&str, &str); 4] = [
    ("idx_target_nodes_parent", "content_nodes(parent_id)"),
    ("idx_target_files_node", "content_files(node_id)"),
    ("idx_target_node_tags", "content_node_tags(node_id)"),
    (
        "idx_target_assessment_node",
        "assessment_metadata(node_id)",
    ),
];

/// Handle to one export database.
#[derive(Clone)]
pub struct TargetStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
    db_path: PathBuf,
}

impl TargetStore {
    /// Create a fresh export database at `db_path` and initialize its
    /// schema. The path is expected not to hold a previous export.
    pub async fn create(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;
        let conn = db.connect()?;

        let store = Self {
            db: Arc::new(db),
            conn,
            db_path,
        };
        store.initialize_schema().await?;
        info!("Prepared the export database.");
        Ok(store)
    }

    /// Open an existing export database read-only-ish (used by tests and
    /// artifact verification).
    pub async fn open(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;
        let conn = db.connect()?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            db_path,
        })
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn execute_pragma(&self, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = self.conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.execute_pragma("PRAGMA journal_mode = WAL").await?;
        self.execute_pragma("PRAGMA busy_timeout = 5000").await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS channel_metadata (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 0,
                thumbnail TEXT NOT NULL DEFAULT '',
                root_id TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS content_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order REAL NOT NULL DEFAULT 1,
                content_id TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                license_owner TEXT NOT NULL DEFAULT '',
                license_id INTEGER,
                lang_id TEXT,
                available INTEGER NOT NULL DEFAULT 0,
                stemmed_metaphone TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE IF NOT EXISTS content_files (
                id TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                extension TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                node_id TEXT NOT NULL,
                preset TEXT NOT NULL,
                supplementary INTEGER NOT NULL DEFAULT 0,
                thumbnail INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                lang_id TEXT,
                available INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE TABLE IF NOT EXISTS languages (
                id TEXT PRIMARY KEY,
                lang_code TEXT NOT NULL,
                lang_subcode TEXT,
                lang_name TEXT
            )",
            "CREATE TABLE IF NOT EXISTS licenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                license_name TEXT NOT NULL,
                license_description TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE IF NOT EXISTS content_tags (
                id TEXT PRIMARY KEY,
                tag_name TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS content_node_tags (
                node_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                PRIMARY KEY (node_id, tag_id)
            )",
            "CREATE TABLE IF NOT EXISTS assessment_metadata (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                assessment_item_ids TEXT NOT NULL DEFAULT '[]',
                number_of_assessments INTEGER NOT NULL DEFAULT 0,
                mastery_model TEXT NOT NULL DEFAULT '{}',
                randomize INTEGER NOT NULL DEFAULT 1,
                is_manipulable INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS prerequisites (
                target_node_id TEXT NOT NULL,
                prerequisite_id TEXT NOT NULL,
                PRIMARY KEY (target_node_id, prerequisite_id)
            )",
        ];
        for sql in statements {
            self.conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("schema statement failed: {}", e))
            })?;
        }
        self.create_secondary_indexes().await?;
        Ok(())
    }

    async fn create_secondary_indexes(&self) -> Result<(), DatabaseError> {
        for (name, on) in SECONDARY_INDEXES {
            self.conn
                .execute(
                    &format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, on),
                    (),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to create index {}: {}", name, e))
                })?;
        }
        Ok(())
    }

    /// Suspend secondary index maintenance for the bulk node-mutation
    /// phase. Must be paired with [`TargetStore::end_bulk_load`].
    pub async fn begin_bulk_load(&self) -> Result<(), DatabaseError> {
        debug!("Beginning bulk load phase");
        for (name, _) in SECONDARY_INDEXES {
            self.conn
                .execute(&format!("DROP INDEX IF EXISTS {}", name), ())
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to drop index {}: {}", name, e))
                })?;
        }
        self.execute_pragma("PRAGMA synchronous = OFF").await?;
        Ok(())
    }

    /// Reconcile after bulk load: rebuild secondary indexes and restore
    /// durability settings.
    pub async fn end_bulk_load(&self) -> Result<(), DatabaseError> {
        self.execute_pragma("PRAGMA synchronous = FULL").await?;
        self.create_secondary_indexes().await?;
        debug!("Bulk load phase reconciled");
        Ok(())
    }

    /// Flush the WAL so the on-disk file is complete before it is copied
    /// to durable storage.
    pub async fn checkpoint(&self) -> Result<(), DatabaseError> {
        self.execute_pragma("PRAGMA wal_checkpoint(TRUNCATE)").await
    }

    //
    // CHANNEL METADATA
    //

    pub async fn create_channel_metadata(
        &self,
        channel: &TargetChannel,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO channel_metadata
                     (id, name, description, version, thumbnail, root_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    channel.id.as_str(),
                    channel.name.as_str(),
                    channel.description.as_str(),
                    channel.version,
                    channel.thumbnail.as_str(),
                    channel.root_id.as_str(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to write channel metadata: {}", e))
            })?;
        Ok(())
    }

    pub async fn get_channel_metadata(
        &self,
        id: &str,
    ) -> Result<Option<TargetChannel>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, version, thumbnail, root_id
                 FROM channel_metadata WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(TargetChannel {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                version: row.get(3)?,
                thumbnail: row.get(4)?,
                root_id: row.get(5)?,
            })),
            None => Ok(None),
        }
    }

    //
    // NODES
    //

    /// Idempotent upsert keyed by source node id.
    pub async fn upsert_node(&self, node: &TargetNode) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO content_nodes
                     (id, parent_id, kind, title, description, sort_order, content_id,
                      author, license_owner, license_id, lang_id, available, stemmed_metaphone)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     parent_id = excluded.parent_id,
                     kind = excluded.kind,
                     title = excluded.title,
                     description = excluded.description,
                     sort_order = excluded.sort_order,
                     content_id = excluded.content_id,
                     author = excluded.author,
                     license_owner = excluded.license_owner,
                     license_id = excluded.license_id,
                     lang_id = excluded.lang_id,
                     available = excluded.available,
                     stemmed_metaphone = excluded.stemmed_metaphone",
                (
                    node.id.as_str(),
                    node.parent_id.clone(),
                    node.kind.as_str(),
                    node.title.as_str(),
                    node.description.as_str(),
                    node.sort_order,
                    node.content_id.as_str(),
                    node.author.as_str(),
                    node.license_owner.as_str(),
                    node.license_id,
                    node.lang_id.clone(),
                    node.available as i64,
                    node.stemmed_metaphone.as_str(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to upsert node: {}", e)))?;
        Ok(())
    }

    pub async fn node_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT EXISTS (SELECT 1 FROM content_nodes WHERE id = ?)")
            .await?;
        let mut rows = stmt.query([id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    pub async fn node_count(&self) -> Result<i64, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM content_nodes")
            .await?;
        let mut rows = stmt.query(()).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("COUNT query returned no row"))?;
        Ok(row.get(0)?)
    }

    /// All nodes in creation-order-independent id order.
    pub async fn all_nodes(&self) -> Result<Vec<TargetNode>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, parent_id, kind, title, description, sort_order, content_id,
                        author, license_owner, license_id, lang_id, available, stemmed_metaphone
                 FROM content_nodes ORDER BY id",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(TargetNode {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                sort_order: row.get(5)?,
                content_id: row.get(6)?,
                author: row.get(7)?,
                license_owner: row.get(8)?,
                license_id: row.get(9)?,
                lang_id: row.get(10)?,
                available: row.get::<i64>(11)? != 0,
                stemmed_metaphone: row.get(12)?,
            });
        }
        Ok(nodes)
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<TargetNode>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, parent_id, kind, title, description, sort_order, content_id,
                        author, license_owner, license_id, lang_id, available, stemmed_metaphone
                 FROM content_nodes WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(TargetNode {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                kind: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                sort_order: row.get(5)?,
                content_id: row.get(6)?,
                author: row.get(7)?,
                license_owner: row.get(8)?,
                license_id: row.get(9)?,
                lang_id: row.get(10)?,
                available: row.get::<i64>(11)? != 0,
                stemmed_metaphone: row.get(12)?,
            })),
            None => Ok(None),
        }
    }

    //
    // FILES
    //

    pub async fn upsert_file(&self, file: &TargetFile) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO content_files
                     (id, checksum, extension, file_size, node_id, preset, supplementary,
                      thumbnail, priority, lang_id, available)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    file.id.as_str(),
                    file.checksum.as_str(),
                    file.extension.as_str(),
                    file.file_size,
                    file.node_id.as_str(),
                    file.preset.as_str(),
                    file.supplementary as i64,
                    file.thumbnail as i64,
                    file.priority,
                    file.lang_id.clone(),
                    file.available as i64,
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to upsert file: {}", e)))?;
        Ok(())
    }

    pub async fn all_files(&self) -> Result<Vec<TargetFile>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, checksum, extension, file_size, node_id, preset, supplementary,
                        thumbnail, priority, lang_id, available
                 FROM content_files ORDER BY id",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(TargetFile {
                id: row.get(0)?,
                checksum: row.get(1)?,
                extension: row.get(2)?,
                file_size: row.get(3)?,
                node_id: row.get(4)?,
                preset: row.get(5)?,
                supplementary: row.get::<i64>(6)? != 0,
                thumbnail: row.get::<i64>(7)? != 0,
                priority: row.get(8)?,
                lang_id: row.get(9)?,
                available: row.get::<i64>(10)? != 0,
            });
        }
        Ok(files)
    }

    pub async fn files_for_node(&self, node_id: &str) -> Result<Vec<TargetFile>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, checksum, extension, file_size, node_id, preset, supplementary,
                        thumbnail, priority, lang_id, available
                 FROM content_files WHERE node_id = ? ORDER BY priority, checksum",
            )
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(TargetFile {
                id: row.get(0)?,
                checksum: row.get(1)?,
                extension: row.get(2)?,
                file_size: row.get(3)?,
                node_id: row.get(4)?,
                preset: row.get(5)?,
                supplementary: row.get::<i64>(6)? != 0,
                thumbnail: row.get::<i64>(7)? != 0,
                priority: row.get(8)?,
                lang_id: row.get(9)?,
                available: row.get::<i64>(10)? != 0,
            });
        }
        Ok(files)
    }

    //
    // LANGUAGES / LICENSES
    //

    /// Create the language row if absent. The stored name resolves
    /// `lang_name` first, then the legacy native-name spelling.
    pub async fn get_or_create_language(&self, language: &Language) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO languages (id, lang_code, lang_subcode, lang_name)
                 VALUES (?, ?, ?, ?)",
                (
                    language.id.as_str(),
                    language.lang_code.as_str(),
                    language.lang_subcode.clone(),
                    language.resolved_name().map(|s| s.to_string()),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create language: {}", e))
            })?;
        Ok(())
    }

    pub async fn language_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT EXISTS (SELECT 1 FROM languages WHERE id = ?)")
            .await?;
        let mut rows = stmt.query([id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    /// Reuse a license row by name+description, creating it when absent.
    /// Returns the target-schema license id.
    pub async fn get_or_create_license(
        &self,
        license_name: &str,
        license_description: &str,
    ) -> Result<i64, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM licenses
                 WHERE license_name = ? AND license_description = ?",
            )
            .await?;
        let mut rows = stmt.query((license_name, license_description)).await?;
        if let Some(row) = rows.next().await? {
            return Ok(row.get(0)?);
        }

        self.conn
            .execute(
                "INSERT INTO licenses (license_name, license_description) VALUES (?, ?)",
                (license_name, license_description),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to create license: {}", e)))?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM licenses
                 WHERE license_name = ? AND license_description = ?",
            )
            .await?;
        let mut rows = stmt.query((license_name, license_description)).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("license insert did not persist"))?;
        Ok(row.get(0)?)
    }

    //
    // TAGS
    //

    pub async fn bulk_create_tags(&self, tags: &[ContentTag]) -> Result<(), DatabaseError> {
        for tag in tags {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO content_tags (id, tag_name) VALUES (?, ?)",
                    (tag.id.as_str(), tag.tag_name.as_str()),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to create tag: {}", e))
                })?;
        }
        Ok(())
    }

    /// Replace the node's tag links with the given set.
    pub async fn set_node_tags(
        &self,
        node_id: &str,
        tag_ids: &[String],
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM content_node_tags WHERE node_id = ?", [node_id])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to clear tags: {}", e)))?;
        for tag_id in tag_ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO content_node_tags (node_id, tag_id) VALUES (?, ?)",
                    (node_id, tag_id.as_str()),
                )
                .await
                .map_err(|e| DatabaseError::sql_execution(format!("Failed to link tag: {}", e)))?;
        }
        Ok(())
    }

    pub async fn tag_ids_for_node(&self, node_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag_id FROM content_node_tags WHERE node_id = ? ORDER BY tag_id")
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    //
    // ASSESSMENT METADATA / PREREQUISITES
    //

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_assessment_metadata(
        &self,
        node_id: &str,
        assessment_item_ids: &str,
        number_of_assessments: i64,
        mastery_model: &str,
        randomize: bool,
        is_manipulable: bool,
    ) -> Result<(), DatabaseError> {
        // Keyed by node id: one metadata row per exercise, stable across
        // repeated transforms of the same tree.
        self.conn
            .execute(
                "INSERT OR REPLACE INTO assessment_metadata
                     (id, node_id, assessment_item_ids, number_of_assessments,
                      mastery_model, randomize, is_manipulable)
                 VALUES (
                     COALESCE(
                         (SELECT id FROM assessment_metadata WHERE node_id = ?1), ?2
                     ),
                     ?1, ?3, ?4, ?5, ?6, ?7
                 )",
                (
                    node_id,
                    Uuid::new_v4().to_string(),
                    assessment_item_ids,
                    number_of_assessments,
                    mastery_model,
                    randomize as i64,
                    is_manipulable as i64,
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to write assessment metadata: {}", e))
            })?;
        Ok(())
    }

    pub async fn assessment_metadata_for_node(
        &self,
        node_id: &str,
    ) -> Result<Option<(String, i64, String, bool)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT assessment_item_ids, number_of_assessments, mastery_model, randomize
                 FROM assessment_metadata WHERE node_id = ?",
            )
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get::<i64>(3)? != 0,
            ))),
            None => Ok(None),
        }
    }

    pub async fn add_prerequisite(
        &self,
        target_node_id: &str,
        prerequisite_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO prerequisites (target_node_id, prerequisite_id)
                 VALUES (?, ?)",
                (target_node_id, prerequisite_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to write prerequisite: {}", e))
            })?;
        Ok(())
    }

    pub async fn prerequisites_for_node(
        &self,
        target_node_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT prerequisite_id FROM prerequisites
                 WHERE target_node_id = ? ORDER BY prerequisite_id",
            )
            .await?;
        let mut rows = stmt.query([target_node_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }
}
