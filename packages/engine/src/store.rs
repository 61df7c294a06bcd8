//! Persistence collaborator
//!
//! The engine never talks to a database itself. It reads quotes, situations,
//! avenants and catalog entries through [`QuoteStore`], and hands back
//! computed results in wire form (see [`crate::wire`]).
//!
//! [`InMemoryStore`] backs the tests and the CLI.
//!
//! # Revisions
//!
//! Every quote document carries a revision number. Bulk ordering updates
//! name the revision they were computed against; a stale revision is a
//! [`EngineError::PersistenceConflict`].

use crate::avenant::Avenant;
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::situation::Period;
use crate::types::{Node, NodeId, NodeKind};
use crate::wire::{OrderEntry, SituationRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A reusable entry of the price catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub code: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub unit_price: f64,
}

impl CatalogItem {
    pub fn new(code: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            kind,
            label: label.into(),
            unit: None,
            unit_price: 0.0,
        }
    }

    pub fn priced(mut self, unit: impl Into<String>, unit_price: f64) -> Self {
        self.unit = Some(unit.into());
        self.unit_price = unit_price;
        self
    }
}

/// A quote document with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document: Document,
    pub revision: u64,
}

/// Trait for persistence implementations.
pub trait QuoteStore: Send + Sync {
    /// Catalog entries whose code or label contains `query`, case-insensitively.
    fn search_catalog(&self, query: &str, kind: Option<NodeKind>) -> Result<Vec<CatalogItem>>;

    fn fetch_document(&self, project: &str) -> Result<StoredDocument>;

    fn fetch_situation(&self, project: &str, period: Period) -> Result<Option<SituationRecord>>;

    /// Every saved situation of a project, oldest first.
    fn list_situations(&self, project: &str) -> Result<Vec<Period>>;

    fn fetch_avenants(&self, project: &str) -> Result<Vec<Avenant>>;

    /// Create or replace a node. Returns the node's server id, newly
    /// assigned when the node carried a temporary one.
    fn upsert_node(&mut self, project: &str, node: &Node) -> Result<NodeId>;

    /// Remove a node and its subtree. Returns the removed ids; a node the
    /// store no longer holds removes nothing.
    fn delete_node(&mut self, project: &str, id: &NodeId) -> Result<Vec<NodeId>>;

    /// Apply a bulk position update made against `expected_revision`.
    ///
    /// Returns the new revision.
    fn update_order(
        &mut self,
        project: &str,
        entries: &[OrderEntry],
        expected_revision: u64,
    ) -> Result<u64>;

    /// Create or replace the situation of `(record.project, record.month, record.year)`.
    fn save_situation(&mut self, record: &SituationRecord) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct ProjectData {
    document: Document,
    revision: u64,
    avenants: Vec<Avenant>,
    situations: BTreeMap<Period, SituationRecord>,
}

/// Store keeping everything in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    projects: HashMap<String, ProjectData>,
    /// Catalog, keyed by lowercase code
    catalog: BTreeMap<String, CatalogItem>,
    next_id: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Register a project with its document (revision 1).
    pub fn with_document(mut self, project: impl Into<String>, document: Document) -> Self {
        self.insert_document(project, document);
        self
    }

    pub fn insert_document(&mut self, project: impl Into<String>, document: Document) {
        let max_id = document
            .nodes()
            .iter()
            .filter_map(|n| match n.id() {
                NodeId::Server(i) => Some(*i),
                NodeId::Temp(_) => None,
            })
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(max_id + 1);

        let entry = self.projects.entry(project.into()).or_default();
        entry.document = document;
        entry.revision += 1;
    }

    pub fn insert_avenant(&mut self, project: &str, avenant: Avenant) -> Result<()> {
        let data = self.project_mut(project)?;
        data.avenants.push(avenant);
        Ok(())
    }

    pub fn add_catalog_item(&mut self, item: CatalogItem) {
        self.catalog.insert(item.code.to_lowercase(), item);
    }

    pub fn catalog_item(&self, code: &str) -> Option<&CatalogItem> {
        self.catalog.get(&code.to_lowercase())
    }

    /// Current revision of a project's document.
    pub fn revision(&self, project: &str) -> Result<u64> {
        Ok(self.project(project)?.revision)
    }

    /// Bump a revision as if another client had written.
    pub fn touch(&mut self, project: &str) -> Result<u64> {
        let data = self.project_mut(project)?;
        data.revision += 1;
        Ok(data.revision)
    }

    fn project(&self, project: &str) -> Result<&ProjectData> {
        self.projects
            .get(project)
            .ok_or_else(|| EngineError::ProjectNotFound(project.to_string()))
    }

    fn project_mut(&mut self, project: &str) -> Result<&mut ProjectData> {
        self.projects
            .get_mut(project)
            .ok_or_else(|| EngineError::ProjectNotFound(project.to_string()))
    }
}

impl QuoteStore for InMemoryStore {
    fn search_catalog(&self, query: &str, kind: Option<NodeKind>) -> Result<Vec<CatalogItem>> {
        let needle = query.to_lowercase();
        Ok(self
            .catalog
            .values()
            .filter(|item| kind.map_or(true, |k| item.kind == k))
            .filter(|item| {
                item.code.to_lowercase().contains(&needle)
                    || item.label.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    fn fetch_document(&self, project: &str) -> Result<StoredDocument> {
        let data = self.project(project)?;
        Ok(StoredDocument {
            document: data.document.clone(),
            revision: data.revision,
        })
    }

    fn fetch_situation(&self, project: &str, period: Period) -> Result<Option<SituationRecord>> {
        Ok(self
            .projects
            .get(project)
            .and_then(|data| data.situations.get(&period))
            .cloned())
    }

    fn list_situations(&self, project: &str) -> Result<Vec<Period>> {
        Ok(self
            .projects
            .get(project)
            .map(|data| data.situations.keys().copied().collect())
            .unwrap_or_default())
    }

    fn fetch_avenants(&self, project: &str) -> Result<Vec<Avenant>> {
        Ok(self
            .projects
            .get(project)
            .map(|data| data.avenants.clone())
            .unwrap_or_default())
    }

    fn upsert_node(&mut self, project: &str, node: &Node) -> Result<NodeId> {
        let server_id = match node.id() {
            NodeId::Temp(_) => {
                let id = NodeId::Server(self.next_id);
                self.next_id += 1;
                id
            }
            id @ NodeId::Server(_) => id.clone(),
        };

        let data = self.project_mut(project)?;
        let mut document = data.document.upsert(node.clone())?;
        if node.id() != &server_id {
            document = document.assign_server_id(node.id(), server_id.clone())?;
        }
        data.document = document;
        data.revision += 1;

        tracing::debug!(project = %project, node_id = %server_id, "Upserted node");
        Ok(server_id)
    }

    fn delete_node(&mut self, project: &str, id: &NodeId) -> Result<Vec<NodeId>> {
        let data = self.project_mut(project)?;
        if !data.document.contains(id) {
            tracing::debug!(project = %project, node_id = %id, "Node already deleted");
            return Ok(Vec::new());
        }
        let (document, removed) = data.document.remove(id)?;
        data.document = document;
        data.revision += 1;

        tracing::debug!(project = %project, node_id = %id, removed = removed.len(), "Deleted node");
        Ok(removed)
    }

    fn update_order(
        &mut self,
        project: &str,
        entries: &[OrderEntry],
        expected_revision: u64,
    ) -> Result<u64> {
        let data = self.project_mut(project)?;
        if data.revision != expected_revision {
            tracing::warn!(
                project = %project,
                expected = expected_revision,
                actual = data.revision,
                "Stale ordering update rejected"
            );
            return Err(EngineError::PersistenceConflict {
                expected: expected_revision,
                actual: data.revision,
            });
        }

        let mut document = data.document.clone();
        for entry in entries {
            document = document.update(&entry.id, |n| n.set_position(entry.position))?;
        }
        data.document = document;
        data.revision += 1;
        Ok(data.revision)
    }

    fn save_situation(&mut self, record: &SituationRecord) -> Result<()> {
        let period = Period::new(record.month, record.year)?;
        let data = self.project_mut(&record.project)?;

        if let Some((later, _)) = data.situations.range(period.next()..).next() {
            return Err(EngineError::SituationLocked(format!(
                "{period} (superseded by {later})"
            )));
        }
        data.situations.insert(period, record.clone());

        tracing::info!(
            project = %record.project,
            period = %period,
            number = record.number,
            "Saved situation"
        );
        Ok(())
    }
}
