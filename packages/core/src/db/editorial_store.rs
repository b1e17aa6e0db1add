//! Editorial Store
//!
//! libsql-backed persistence for the authoring-side records: channels,
//! nodes, files, assessment items, tags, licenses, languages, prerequisites
//! and distribution tokens.
//!
//! The export pipeline treats this store as read-only except for the
//! sanctioned publish mutations: the family-wide flag sweep, the version
//! bump, channel aggregates, token creation, the cached channel icon, and
//! exercise bundle file replacement. All of those run inside one explicit
//! transaction scope (`begin_publish` / `commit_publish` /
//! `rollback_publish`) held on the store's single connection, so a crash
//! mid-export leaves the source tree untouched.
//!
//! Tree-shaped queries (descendant checks, family sweeps, publish
//! aggregates) use recursive CTEs rather than materialized tree metadata.

use crate::db::error::DatabaseError;
use crate::models::{
    AssessmentItem, Channel, ContentKind, ContentTag, EditorialNode, FileAsset, FormatPreset,
    Language, License, SecretToken,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Handle to the editorial database.
///
/// Holds a single connection: the export pipeline is strictly sequential
/// and the publish transaction must span every sanctioned mutation.
#[derive(Clone)]
pub struct EditorialStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
    db_path: PathBuf,
}

impl EditorialStore {
    /// Open (or create) the editorial database at `db_path`.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
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
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// PRAGMA statements return rows, so they go through query().
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
        self.execute_pragma("PRAGMA foreign_keys = ON").await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 0,
                root_id TEXT NOT NULL,
                language_id TEXT,
                thumbnail TEXT,
                thumbnail_encoding TEXT,
                icon_encoding TEXT,
                last_published TEXT,
                total_resource_count INTEGER NOT NULL DEFAULT 0,
                published_kind_count TEXT,
                published_size INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order REAL NOT NULL DEFAULT 1,
                content_id TEXT NOT NULL,
                author TEXT,
                copyright_holder TEXT,
                license_id TEXT,
                license_description TEXT,
                language_id TEXT,
                changed INTEGER NOT NULL DEFAULT 1,
                published INTEGER NOT NULL DEFAULT 0,
                thumbnail_encoding TEXT,
                extra_fields TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (parent_id) REFERENCES nodes(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS assessment_items (
                assessment_id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                question TEXT NOT NULL DEFAULT '',
                answers TEXT NOT NULL DEFAULT '[]',
                hints TEXT NOT NULL DEFAULT '[]',
                raw_data TEXT NOT NULL DEFAULT '',
                item_order INTEGER NOT NULL DEFAULT 0,
                randomize INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                node_id TEXT,
                assessment_id TEXT,
                checksum TEXT NOT NULL,
                extension TEXT NOT NULL,
                preset TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                original_filename TEXT NOT NULL DEFAULT '',
                language_id TEXT,
                uploaded_by TEXT,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (assessment_id)
                    REFERENCES assessment_items(assessment_id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS licenses (
                id TEXT PRIMARY KEY,
                license_name TEXT NOT NULL,
                license_description TEXT NOT NULL DEFAULT '',
                is_custom INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS languages (
                id TEXT PRIMARY KEY,
                lang_code TEXT NOT NULL,
                lang_subcode TEXT,
                lang_name TEXT,
                native_name TEXT
            )",
            "CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS node_tags (
                node_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                PRIMARY KEY (node_id, tag_id),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS prerequisites (
                target_node_id TEXT NOT NULL,
                prerequisite_id TEXT NOT NULL,
                PRIMARY KEY (target_node_id, prerequisite_id),
                FOREIGN KEY (target_node_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (prerequisite_id) REFERENCES nodes(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS secret_tokens (
                token TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS channel_languages (
                channel_id TEXT NOT NULL,
                language_id TEXT NOT NULL,
                PRIMARY KEY (channel_id, language_id),
                FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_files_node ON files(node_id)",
            "CREATE INDEX IF NOT EXISTS idx_files_assessment ON files(assessment_id)",
            "CREATE INDEX IF NOT EXISTS idx_items_node ON assessment_items(node_id)",
            "CREATE INDEX IF NOT EXISTS idx_tokens_channel ON secret_tokens(channel_id)",
        ];

        for sql in statements {
            self.conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("schema statement failed: {}", e))
            })?;
        }
        Ok(())
    }

    //
    // PUBLISH TRANSACTION SCOPE
    //

    /// Begin the publish transaction. Every sanctioned mutation between this
    /// and `commit_publish` is all-or-nothing.
    pub async fn begin_publish(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("BEGIN failed: {}", e)))?;
        Ok(())
    }

    pub async fn commit_publish(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("COMMIT failed: {}", e)))?;
        Ok(())
    }

    pub async fn rollback_publish(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("ROLLBACK failed: {}", e)))?;
        Ok(())
    }

    //
    // RECORD CREATION (editing surface / fixtures)
    //

    pub async fn create_channel(&self, channel: &Channel) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO channels (id, name, description, version, root_id, language_id,
                        thumbnail, thumbnail_encoding, icon_encoding, last_published,
                        total_resource_count, published_kind_count, published_size)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    channel.id.as_str(),
                    channel.name.as_str(),
                    channel.description.as_str(),
                    channel.version,
                    channel.root_id.as_str(),
                    channel.language_id.clone(),
                    channel.thumbnail.clone(),
                    channel.thumbnail_encoding.clone(),
                    channel.icon_encoding.clone(),
                    channel.last_published.map(|t| t.to_rfc3339()),
                    channel.total_resource_count,
                    channel.published_kind_count.clone(),
                    channel.published_size,
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert channel: {}", e)))?;
        Ok(())
    }

    pub async fn create_node(&self, node: &EditorialNode) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO nodes (id, parent_id, kind, title, description, sort_order,
                        content_id, author, copyright_holder, license_id, license_description,
                        language_id, changed, published, thumbnail_encoding, extra_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    node.id.as_str(),
                    node.parent_id.clone(),
                    node.kind.as_str(),
                    node.title.as_str(),
                    node.description.as_str(),
                    node.sort_order,
                    node.content_id.as_str(),
                    node.author.clone(),
                    node.copyright_holder.clone(),
                    node.license_id.clone(),
                    node.license_description.clone(),
                    node.language_id.clone(),
                    node.changed as i64,
                    node.published as i64,
                    node.thumbnail_encoding.clone(),
                    node.extra_fields.to_string(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert node: {}", e)))?;
        Ok(())
    }

    pub async fn create_license(&self, license: &License) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO licenses (id, license_name, license_description, is_custom)
                 VALUES (?, ?, ?, ?)",
                (
                    license.id.as_str(),
                    license.license_name.as_str(),
                    license.license_description.as_str(),
                    license.is_custom as i64,
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert license: {}", e)))?;
        Ok(())
    }

    pub async fn create_language(&self, language: &Language) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO languages (id, lang_code, lang_subcode, lang_name, native_name)
                 VALUES (?, ?, ?, ?, ?)",
                (
                    language.id.as_str(),
                    language.lang_code.as_str(),
                    language.lang_subcode.clone(),
                    language.lang_name.clone(),
                    language.native_name.clone(),
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert language: {}", e))
            })?;
        Ok(())
    }

    pub async fn create_tag(&self, channel_id: &str, tag: &ContentTag) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO tags (id, channel_id, tag_name) VALUES (?, ?, ?)",
                (tag.id.as_str(), channel_id, tag.tag_name.as_str()),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert tag: {}", e)))?;
        Ok(())
    }

    pub async fn tag_node(&self, node_id: &str, tag_id: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO node_tags (node_id, tag_id) VALUES (?, ?)",
                (node_id, tag_id),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to tag node: {}", e)))?;
        Ok(())
    }

    pub async fn create_file(&self, file: &FileAsset) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO files (id, node_id, assessment_id, checksum, extension, preset,
                        file_size, original_filename, language_id, uploaded_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    file.id.as_str(),
                    file.node_id.clone(),
                    file.assessment_id.clone(),
                    file.checksum.as_str(),
                    file.extension.as_str(),
                    file.preset.as_str(),
                    file.file_size,
                    file.original_filename.as_str(),
                    file.language_id.clone(),
                    file.uploaded_by.clone(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert file: {}", e)))?;
        Ok(())
    }

    pub async fn create_assessment_item(&self, item: &AssessmentItem) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO assessment_items (assessment_id, node_id, item_type, question,
                        answers, hints, raw_data, item_order, randomize)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    item.assessment_id.as_str(),
                    item.node_id.as_str(),
                    item.item_type.as_str(),
                    item.question.as_str(),
                    item.answers.as_str(),
                    item.hints.as_str(),
                    item.raw_data.as_str(),
                    item.order,
                    item.randomize as i64,
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to insert assessment item: {}", e))
            })?;
        Ok(())
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
                DatabaseError::sql_execution(format!("Failed to insert prerequisite: {}", e))
            })?;
        Ok(())
    }

    //
    // READS
    //

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, version, root_id, language_id, thumbnail,
                        thumbnail_encoding, icon_encoding, last_published,
                        total_resource_count, published_kind_count, published_size
                 FROM channels WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_channel(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<EditorialNode>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?", Self::NODE_SELECT))
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// Children of a node in sibling order.
    pub async fn get_children(&self, parent_id: &str) -> Result<Vec<EditorialNode>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE parent_id = ? ORDER BY sort_order, id",
                Self::NODE_SELECT
            ))
            .await?;
        let mut rows = stmt.query([parent_id]).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    /// Whether the node or any of its descendants is of a leaf kind.
    ///
    /// Empty topics fail this check and are pruned from exports.
    pub async fn has_leaf_descendant(&self, node_id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT EXISTS (
                     SELECT 1 FROM nodes
                     WHERE id IN (SELECT id FROM family) AND kind != 'topic'
                 )",
            )
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    /// Whether any node in the root's family (including the root) carries
    /// the `changed` flag. Drives the "nothing to do" early exit.
    pub async fn family_has_changes(&self, root_id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT EXISTS (
                     SELECT 1 FROM nodes
                     WHERE id IN (SELECT id FROM family) AND changed = 1
                 )",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    pub async fn get_license(&self, id: &str) -> Result<Option<License>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, license_name, license_description, is_custom
                 FROM licenses WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(License {
                id: row.get(0)?,
                license_name: row.get(1)?,
                license_description: row.get(2)?,
                is_custom: row.get::<i64>(3)? != 0,
            })),
            None => Ok(None),
        }
    }

    pub async fn get_language(&self, id: &str) -> Result<Option<Language>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, lang_code, lang_subcode, lang_name, native_name
                 FROM languages WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Language {
                id: row.get(0)?,
                lang_code: row.get(1)?,
                lang_subcode: row.get(2)?,
                lang_name: row.get(3)?,
                native_name: row.get(4)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn files_for_node(&self, node_id: &str) -> Result<Vec<FileAsset>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE node_id = ? ORDER BY preset, checksum",
                Self::FILE_SELECT
            ))
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(Self::row_to_file(&row)?);
        }
        Ok(files)
    }

    pub async fn has_file_with_preset(
        &self,
        node_id: &str,
        preset: FormatPreset,
    ) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT EXISTS (SELECT 1 FROM files WHERE node_id = ? AND preset = ?)")
            .await?;
        let mut rows = stmt.query((node_id, preset.as_str())).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    /// Files attached to one assessment item with the given preset, in
    /// checksum order for deterministic bundling.
    pub async fn files_for_assessment_item(
        &self,
        assessment_id: &str,
        preset: FormatPreset,
    ) -> Result<Vec<FileAsset>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE assessment_id = ? AND preset = ? ORDER BY checksum",
                Self::FILE_SELECT
            ))
            .await?;
        let mut rows = stmt.query((assessment_id, preset.as_str())).await?;
        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(Self::row_to_file(&row)?);
        }
        Ok(files)
    }

    /// Assessment items of an exercise in their stable authored order.
    pub async fn assessment_items_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<AssessmentItem>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT assessment_id, node_id, item_type, question, answers, hints,
                        raw_data, item_order, randomize
                 FROM assessment_items WHERE node_id = ? ORDER BY item_order, assessment_id",
            )
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(AssessmentItem {
                assessment_id: row.get(0)?,
                node_id: row.get(1)?,
                item_type: row.get(2)?,
                question: row.get(3)?,
                answers: row.get(4)?,
                hints: row.get(5)?,
                raw_data: row.get(6)?,
                order: row.get(7)?,
                randomize: row.get::<i64>(8)? != 0,
            });
        }
        Ok(items)
    }

    pub async fn tags_for_channel(
        &self,
        channel_id: &str,
    ) -> Result<Vec<ContentTag>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, tag_name FROM tags WHERE channel_id = ? ORDER BY tag_name")
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next().await? {
            tags.push(ContentTag {
                id: row.get(0)?,
                tag_name: row.get(1)?,
            });
        }
        Ok(tags)
    }

    pub async fn tag_ids_for_node(&self, node_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag_id FROM node_tags WHERE node_id = ? ORDER BY tag_id")
            .await?;
        let mut rows = stmt.query([node_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    /// All prerequisite relationships where both ends live in the root's
    /// family, as `(prerequisite_id, target_node_id)` pairs.
    pub async fn prerequisites_in_tree(
        &self,
        root_id: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT prerequisite_id, target_node_id FROM prerequisites
                 WHERE prerequisite_id IN (SELECT id FROM family)
                   AND target_node_id IN (SELECT id FROM family)
                 ORDER BY target_node_id, prerequisite_id",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next().await? {
            pairs.push((row.get(0)?, row.get(1)?));
        }
        Ok(pairs)
    }

    //
    // TOKENS
    //

    pub async fn token_exists(&self, token: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT EXISTS (SELECT 1 FROM secret_tokens WHERE token = ?)")
            .await?;
        let mut rows = stmt.query([token]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    pub async fn has_primary_token(&self, channel_id: &str) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT EXISTS (
                     SELECT 1 FROM secret_tokens WHERE channel_id = ? AND is_primary = 1
                 )",
            )
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("EXISTS query returned no row"))?;
        Ok(row.get::<i64>(0)? != 0)
    }

    pub async fn create_secret_token(
        &self,
        channel_id: &str,
        token: &str,
        is_primary: bool,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO secret_tokens (token, channel_id, is_primary) VALUES (?, ?, ?)",
                (token, channel_id, is_primary as i64),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert token: {}", e)))?;
        Ok(())
    }

    pub async fn tokens_for_channel(
        &self,
        channel_id: &str,
    ) -> Result<Vec<SecretToken>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT token, is_primary FROM secret_tokens
                 WHERE channel_id = ? ORDER BY is_primary DESC, token",
            )
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        let mut tokens = Vec::new();
        while let Some(row) = rows.next().await? {
            tokens.push(SecretToken {
                token: row.get(0)?,
                is_primary: row.get::<i64>(1)? != 0,
            });
        }
        Ok(tokens)
    }

    //
    // SANCTIONED PUBLISH MUTATIONS
    //

    /// Replace the node's exercise bundle file record with a new one.
    pub async fn replace_exercise_bundle_file(
        &self,
        node_id: &str,
        file: &FileAsset,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM files WHERE node_id = ? AND preset = ?",
                (node_id, FormatPreset::Exercise.as_str()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete old bundle file: {}", e))
            })?;
        self.create_file(file).await
    }

    /// Rewrite publish state across the entire node family: clear `changed`
    /// and set `published` on the root and every descendant.
    pub async fn mark_family_published(&self, root_id: &str) -> Result<(), DatabaseError> {
        debug!("Marking node family of {} as published", root_id);
        self.conn
            .execute(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 UPDATE nodes SET changed = 0, published = 1
                 WHERE id IN (SELECT id FROM family)",
                [root_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to mark family published: {}", e))
            })?;
        Ok(())
    }

    /// Bump the channel version and stamp the publish time, together.
    pub async fn increment_channel_version(
        &self,
        channel_id: &str,
        published_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE channels SET version = version + 1, last_published = ? WHERE id = ?",
                (published_at.to_rfc3339(), channel_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to increment version: {}", e))
            })?;
        Ok(())
    }

    pub async fn set_channel_icon(
        &self,
        channel_id: &str,
        icon_encoding: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE channels SET icon_encoding = ? WHERE id = ?",
                (icon_encoding, channel_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to set channel icon: {}", e))
            })?;
        Ok(())
    }

    pub async fn update_channel_aggregates(
        &self,
        channel_id: &str,
        total_resource_count: i64,
        published_kind_count: &str,
        published_size: i64,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "UPDATE channels
                 SET total_resource_count = ?, published_kind_count = ?, published_size = ?
                 WHERE id = ?",
                (
                    total_resource_count,
                    published_kind_count,
                    published_size,
                    channel_id,
                ),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to update aggregates: {}", e))
            })?;
        Ok(())
    }

    pub async fn add_included_language(
        &self,
        channel_id: &str,
        language_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO channel_languages (channel_id, language_id)
                 VALUES (?, ?)",
                (channel_id, language_id),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to add included language: {}", e))
            })?;
        Ok(())
    }

    pub async fn included_languages(&self, channel_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT language_id FROM channel_languages
                 WHERE channel_id = ? ORDER BY language_id",
            )
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    //
    // PUBLISH AGGREGATE QUERIES
    //
    // All aggregate queries run over the root's *descendants* (family minus
    // the root itself) restricted to published nodes, mirroring how the
    // aggregates are defined: stats describe what this publish shipped.
    //

    pub async fn published_resource_count(&self, root_id: &str) -> Result<i64, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?1
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT COUNT(*) FROM nodes
                 WHERE id IN (SELECT id FROM family) AND id != ?1
                   AND published = 1 AND kind != 'topic'",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("COUNT query returned no row"))?;
        Ok(row.get(0)?)
    }

    /// Published node counts per kind, in kind order.
    pub async fn published_kind_counts(
        &self,
        root_id: &str,
    ) -> Result<Vec<(String, i64)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?1
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT kind, COUNT(*) FROM nodes
                 WHERE id IN (SELECT id FROM family) AND id != ?1 AND published = 1
                 GROUP BY kind ORDER BY kind",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            counts.push((row.get(0)?, row.get(1)?));
        }
        Ok(counts)
    }

    /// Total size of published files, deduplicated by checksum+size pair.
    pub async fn published_file_size(&self, root_id: &str) -> Result<i64, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?1
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 )
                 SELECT COALESCE(SUM(file_size), 0) FROM (
                     SELECT DISTINCT f.checksum, f.file_size FROM files f
                     JOIN nodes n ON f.node_id = n.id
                     WHERE n.id IN (SELECT id FROM family) AND n.id != ?1
                       AND n.published = 1
                 )",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::sql_execution("SUM query returned no row"))?;
        Ok(row.get(0)?)
    }

    /// Distinct languages referenced by published nodes or their files.
    pub async fn published_language_ids(
        &self,
        root_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "WITH RECURSIVE family(id) AS (
                     SELECT id FROM nodes WHERE id = ?1
                     UNION ALL
                     SELECT n.id FROM nodes n JOIN family f ON n.parent_id = f.id
                 ),
                 published(id) AS (
                     SELECT id FROM nodes
                     WHERE id IN (SELECT id FROM family) AND id != ?1 AND published = 1
                 )
                 SELECT DISTINCT language_id FROM (
                     SELECT language_id FROM nodes
                     WHERE id IN (SELECT id FROM published) AND language_id IS NOT NULL
                     UNION
                     SELECT f.language_id FROM files f
                     WHERE f.node_id IN (SELECT id FROM published)
                       AND f.language_id IS NOT NULL
                 )
                 ORDER BY language_id",
            )
            .await?;
        let mut rows = stmt.query([root_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    //
    // ROW CONVERSION
    //

    const NODE_SELECT: &'static str = "SELECT id, parent_id, kind, title, description, \
         sort_order, content_id, author, copyright_holder, license_id, license_description, \
         language_id, changed, published, thumbnail_encoding, extra_fields FROM nodes";

    const FILE_SELECT: &'static str = "SELECT id, node_id, assessment_id, checksum, extension, \
         preset, file_size, original_filename, language_id, uploaded_by FROM files";

    fn row_to_node(row: &libsql::Row) -> Result<EditorialNode, DatabaseError> {
        let kind_str: String = row.get(2)?;
        let kind = ContentKind::parse(&kind_str)
            .ok_or_else(|| DatabaseError::malformed_row(format!("unknown kind '{}'", kind_str)))?;
        let extra_fields_raw: String = row.get(15)?;
        let extra_fields = serde_json::from_str(&extra_fields_raw)
            .map_err(|e| DatabaseError::malformed_row(format!("extra_fields: {}", e)))?;
        Ok(EditorialNode {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            kind,
            title: row.get(3)?,
            description: row.get(4)?,
            sort_order: row.get(5)?,
            content_id: row.get(6)?,
            author: row.get(7)?,
            copyright_holder: row.get(8)?,
            license_id: row.get(9)?,
            license_description: row.get(10)?,
            language_id: row.get(11)?,
            changed: row.get::<i64>(12)? != 0,
            published: row.get::<i64>(13)? != 0,
            thumbnail_encoding: row.get(14)?,
            extra_fields,
        })
    }

    fn row_to_file(row: &libsql::Row) -> Result<FileAsset, DatabaseError> {
        let preset_str: String = row.get(5)?;
        let preset = FormatPreset::parse(&preset_str).ok_or_else(|| {
            DatabaseError::malformed_row(format!("unknown preset '{}'", preset_str))
        })?;
        Ok(FileAsset {
            id: row.get(0)?,
            node_id: row.get(1)?,
            assessment_id: row.get(2)?,
            checksum: row.get(3)?,
            extension: row.get(4)?,
            preset,
            file_size: row.get(6)?,
            original_filename: row.get(7)?,
            language_id: row.get(8)?,
            uploaded_by: row.get(9)?,
        })
    }

    fn row_to_channel(row: &libsql::Row) -> Result<Channel, DatabaseError> {
        let last_published: Option<String> = row.get(9)?;
        let last_published = match last_published {
            Some(raw) => Some(Self::parse_timestamp(&raw)?),
            None => None,
        };
        Ok(Channel {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
            root_id: row.get(4)?,
            language_id: row.get(5)?,
            thumbnail: row.get(6)?,
            thumbnail_encoding: row.get(7)?,
            icon_encoding: row.get(8)?,
            last_published,
            total_resource_count: row.get(10)?,
            published_kind_count: row.get(11)?,
            published_size: row.get(12)?,
        })
    }

    /// Parse a stored timestamp - RFC3339 as written by this store, with a
    /// fallback for SQLite's CURRENT_TIMESTAMP format.
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }
        Err(DatabaseError::malformed_row(format!(
            "unparseable timestamp '{}'",
            s
        )))
    }
}
