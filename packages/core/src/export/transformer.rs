//! Tree Transformer
//!
//! Breadth-first walk of the editorial tree that maps every reachable
//! non-empty node into the target schema. Parents are always created
//! before their children, which the target schema requires for its parent
//! links; topics with no leaf-kind descendants are pruned entirely.
//!
//! Exercise bundles are only regenerated when forced, when the node is
//! flagged changed, or when no bundle file exists yet.

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::assets::materialize_node_files;
use crate::export::error::ExportError;
use crate::export::perseus::{process_assessment_metadata, ExerciseBundler};
use crate::models::{ContentKind, EditorialNode, FormatPreset, Language, TargetNode};
use crate::utils::fuzz;
use std::collections::VecDeque;
use tracing::debug;

/// Walks one channel's tree into a target store.
pub struct TreeTransformer<'a> {
    editorial: &'a EditorialStore,
    target: &'a TargetStore,
    storage: &'a AssetStorage,
    /// Channel default language, the fallback for nodes without their own.
    default_language: Option<Language>,
    force_exercises: bool,
    user_id: Option<String>,
}

impl<'a> TreeTransformer<'a> {
    pub fn new(
        editorial: &'a EditorialStore,
        target: &'a TargetStore,
        storage: &'a AssetStorage,
        default_language: Option<Language>,
        force_exercises: bool,
        user_id: Option<String>,
    ) -> Self {
        Self {
            editorial,
            target,
            storage,
            default_language,
            force_exercises,
            user_id,
        }
    }

    /// Map the tree rooted at `root` into the target store.
    pub async fn run(&self, root: &EditorialNode) -> Result<(), ExportError> {
        let mut queue: VecDeque<EditorialNode> = VecDeque::new();
        queue.push_back(root.clone());

        while let Some(node) = queue.pop_front() {
            debug!("Mapping node with id {}", node.id);

            // A topic with no leaf descendants is pruned outright; its
            // subtree can only contain more empty topics.
            let available =
                node.kind.is_leaf() || self.editorial.has_leaf_descendant(&node.id).await?;
            if !available {
                continue;
            }

            queue.extend(self.editorial.get_children(&node.id).await?);

            self.create_bare_node(&node, available).await?;

            if node.kind == ContentKind::Exercise {
                let items = self.editorial.assessment_items_for_node(&node.id).await?;
                let manifest = process_assessment_metadata(&node, &items, self.target).await?;

                let needs_bundle = self.force_exercises
                    || node.changed
                    || !self
                        .editorial
                        .has_file_with_preset(&node.id, FormatPreset::Exercise)
                        .await?;
                if needs_bundle {
                    ExerciseBundler::new(self.editorial, self.storage)
                        .create_exercise_bundle(&node, &items, &manifest, self.user_id.as_deref())
                        .await?;
                }
            }

            materialize_node_files(self.editorial, self.target, self.storage, &node).await?;
            self.map_node_tags(&node).await?;
        }
        Ok(())
    }

    /// Create or update the node's target record.
    async fn create_bare_node(
        &self,
        node: &EditorialNode,
        available: bool,
    ) -> Result<TargetNode, ExportError> {
        if let Some(parent_id) = &node.parent_id {
            if !self.target.node_exists(parent_id).await? {
                return Err(ExportError::missing_reference("parent node", parent_id));
            }
        }

        let license_id = match &node.license_id {
            Some(id) => Some(self.resolve_license(node, id).await?),
            None => None,
        };
        let lang_id = self.resolve_language(node).await?;

        let target_node = TargetNode {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            kind: node.kind.as_str().to_string(),
            title: node.title.clone(),
            description: node.description.clone(),
            sort_order: node.sort_order,
            content_id: node.content_id.clone(),
            author: node.author.clone().unwrap_or_default(),
            license_owner: node.copyright_holder.clone().unwrap_or_default(),
            license_id,
            lang_id,
            available,
            stemmed_metaphone: fuzz(&format!("{} {}", node.title, node.description)),
        };
        self.target.upsert_node(&target_node).await?;
        Ok(target_node)
    }

    /// Create-or-reuse the target license row. Custom licenses take their
    /// description from the node's override rather than the license record.
    async fn resolve_license(
        &self,
        node: &EditorialNode,
        license_id: &str,
    ) -> Result<i64, ExportError> {
        let license = self
            .editorial
            .get_license(license_id)
            .await?
            .ok_or_else(|| ExportError::missing_reference("license", license_id))?;
        let description = if license.is_custom {
            node.license_description.clone().unwrap_or_default()
        } else {
            license.license_description.clone()
        };
        Ok(self
            .target
            .get_or_create_license(&license.license_name, &description)
            .await?)
    }

    /// Node language, falling back to the channel default. A node with no
    /// language and no channel default exports a null language field.
    async fn resolve_language(
        &self,
        node: &EditorialNode,
    ) -> Result<Option<String>, ExportError> {
        let language = match &node.language_id {
            Some(id) => Some(
                self.editorial
                    .get_language(id)
                    .await?
                    .ok_or_else(|| ExportError::missing_reference("language", id))?,
            ),
            None => self.default_language.clone(),
        };
        match language {
            Some(language) => {
                self.target.get_or_create_language(&language).await?;
                Ok(Some(language.id))
            }
            None => Ok(None),
        }
    }

    async fn map_node_tags(&self, node: &EditorialNode) -> Result<(), ExportError> {
        let tag_ids = self.editorial.tag_ids_for_node(&node.id).await?;
        if !tag_ids.is_empty() {
            self.target.set_node_tags(&node.id, &tag_ids).await?;
        }
        Ok(())
    }

    /// Copy every prerequisite relationship whose endpoints both survived
    /// the transform.
    pub async fn map_prerequisites(&self, root_id: &str) -> Result<(), ExportError> {
        for (prerequisite_id, target_node_id) in
            self.editorial.prerequisites_in_tree(root_id).await?
        {
            if !self.target.node_exists(&target_node_id).await? {
                return Err(ExportError::missing_reference("node", target_node_id));
            }
            if !self.target.node_exists(&prerequisite_id).await? {
                return Err(ExportError::missing_reference("node", prerequisite_id));
            }
            self.target
                .add_prerequisite(&target_node_id, &prerequisite_id)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "transformer_test.rs"]
mod transformer_test;
