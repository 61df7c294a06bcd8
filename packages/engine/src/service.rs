//! Editing session over a quote
//!
//! [`DevisSession`] holds the in-memory document of one project and keeps its
//! totals current as the user edits. The local document is the source of
//! truth until it is saved; the store only sees explicit saves.
//!
//! # Example
//!
//! ```ignore
//! use devis_engine::{BillingConfig, DevisSession, InMemoryStore, TargetPosition};
//!
//! let mut session = DevisSession::open(store, "chantier-12", BillingConfig::default())?;
//! session.add_from_catalog("BET-01", &TargetPosition::End)?;
//! println!("{}", session.totals().global);
//! session.save()?;
//! ```
//!
//! # Reorder batches
//!
//! A drag-and-drop can move many nodes. Between [`DevisSession::begin_reorder`]
//! and [`DevisSession::finish_reorder`] edits do not trigger recomputation;
//! one pass runs at the end.
//!
//! # Failures
//!
//! A computation error never loses the totals on screen: the last good
//! totals stay available next to a warning. A rejected ordering update
//! re-reads the store revision and keeps the local edit for resubmission.

use crate::bases::compute_bases;
use crate::config::BillingConfig;
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::position::{insert_at, reorder, Placement, TargetPosition};
use crate::projector::{project, Orphan, Tree};
use crate::situation::{self, Situation};
use crate::special::{evaluate, Totals};
use crate::store::{CatalogItem, QuoteStore};
use crate::types::{DetailLine, Node, NodeId, NodeKind, Part, Scope, SpecialKind, SpecialLine, Subpart};
use crate::wire::changed_positions;

/// Editing session for one project.
pub struct DevisSession<S: QuoteStore> {
    store: S,
    project: String,
    billing: BillingConfig,
    document: Document,
    /// Document as last read from or written to the store
    saved: Document,
    revision: u64,
    /// Store document read after a conflict, for the caller to inspect
    remote: Option<Document>,
    reordering: bool,
    pending: bool,
    totals: Totals,
    orphans: Vec<Orphan>,
    warning: Option<String>,
    recomputations: usize,
}

impl<S: QuoteStore> DevisSession<S> {
    /// Open a project from the store and compute its totals.
    pub fn open(store: S, project: impl Into<String>, billing: BillingConfig) -> Result<Self> {
        let project = project.into();
        let stored = store.fetch_document(&project)?;
        tracing::debug!(
            project = %project,
            nodes = stored.document.len(),
            revision = stored.revision,
            "Opened session"
        );

        let mut session = Self {
            store,
            project,
            billing,
            saved: stored.document.clone(),
            document: stored.document,
            revision: stored.revision,
            remote: None,
            reordering: false,
            pending: false,
            totals: Totals::default(),
            orphans: Vec::new(),
            warning: None,
            recomputations: 0,
        };
        session.recompute();
        Ok(session)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn billing(&self) -> &BillingConfig {
        &self.billing
    }

    /// Current totals, or the last good ones if the latest computation failed.
    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Why [`Self::totals`] may be out of date.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    /// Store document read after the last conflict.
    pub fn remote(&self) -> Option<&Document> {
        self.remote.as_ref()
    }

    /// Number of evaluation passes run so far.
    pub fn recomputations(&self) -> usize {
        self.recomputations
    }

    pub fn is_reordering(&self) -> bool {
        self.reordering
    }

    /// Whether the local document differs from the stored one.
    pub fn is_dirty(&self) -> bool {
        self.document != self.saved
    }

    pub fn tree(&self) -> Tree {
        project(&self.document).tree
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    pub fn insert(&mut self, node: Node, target: &TargetPosition) -> Result<Placement> {
        let placement = insert_at(&self.document, node, target)?;
        self.apply(placement.document.clone());
        Ok(placement)
    }

    /// Insert a node built from a catalog entry, under a temporary id.
    pub fn add_from_catalog(&mut self, code: &str, target: &TargetPosition) -> Result<NodeId> {
        let item = self
            .store
            .search_catalog(code, None)?
            .into_iter()
            .find(|item| item.code.eq_ignore_ascii_case(code))
            .ok_or_else(|| EngineError::NodeNotFound(format!("catalog item {code}")))?;

        let id = self.document.temp_id();
        let node = node_from_catalog(&item, id.clone());
        self.insert(node, target)?;
        tracing::debug!(code = %item.code, node_id = %id, "Added catalog item");
        Ok(id)
    }

    pub fn reorder(&mut self, dragged: &NodeId, target: &TargetPosition) -> Result<Placement> {
        let placement = reorder(&self.document, dragged, target)?;
        self.apply(placement.document.clone());
        Ok(placement)
    }

    /// Start a batch of moves; recomputation waits for [`Self::finish_reorder`].
    pub fn begin_reorder(&mut self) {
        self.reordering = true;
    }

    /// End a batch of moves and recompute once if anything changed.
    pub fn finish_reorder(&mut self) {
        self.reordering = false;
        if self.pending {
            self.pending = false;
            self.recompute();
        }
    }

    /// Remove a node and its subtree. Returns the removed ids.
    pub fn remove(&mut self, id: &NodeId) -> Result<Vec<NodeId>> {
        let (next, removed) = self.document.remove(id)?;
        self.apply(next);
        Ok(removed)
    }

    /// Edit a node in place (quantity, price, value...).
    pub fn update<F>(&mut self, id: &NodeId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let next = self.document.update(id, edit)?;
        self.apply(next);
        Ok(())
    }

    fn apply(&mut self, next: Document) {
        self.document = next;
        if self.reordering {
            self.pending = true;
        } else {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        self.recomputations += 1;
        let projection = project(&self.document);
        self.orphans = projection.orphans;

        match evaluate(&projection.tree, &compute_bases(&projection.tree)) {
            Ok(totals) => {
                self.totals = totals;
                self.warning = None;
            }
            Err(e) => {
                tracing::warn!(project = %self.project, error = %e, "Keeping last good totals");
                self.warning = Some(format!("Totals not updated: {e}"));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Save removals, new and modified nodes, then the ordering.
    pub fn save(&mut self) -> Result<u64> {
        self.save_removals()?;
        self.save_nodes()?;
        self.save_order()
    }

    /// Delete from the store the nodes removed locally since the last save.
    /// Returns the ids the store removed.
    pub fn save_removals(&mut self) -> Result<Vec<NodeId>> {
        let gone: Vec<NodeId> = self
            .saved
            .preorder()
            .into_iter()
            .filter(|n| !self.document.contains(n.id()))
            .map(|n| n.id().clone())
            .collect();

        let mut deleted = Vec::new();
        for id in gone {
            if !self.saved.contains(&id) {
                continue;
            }
            let removed = self.store.delete_node(&self.project, &id)?;
            if !removed.is_empty() {
                self.revision += 1;
            }
            self.saved = self.saved.remove(&id)?.0;
            deleted.extend(removed);
        }
        if !deleted.is_empty() {
            tracing::debug!(project = %self.project, removed = deleted.len(), "Saved removals");
        }
        Ok(deleted)
    }

    /// Upsert nodes that are new or changed since the last save, parents
    /// first. Temporary ids are replaced by the ids the store assigns.
    pub fn save_nodes(&mut self) -> Result<Vec<(NodeId, NodeId)>> {
        let changed: Vec<NodeId> = self
            .document
            .preorder()
            .into_iter()
            .filter(|n| self.saved.get(n.id()) != Some(*n))
            .map(|n| n.id().clone())
            .collect();

        let mut renamed = Vec::new();
        for id in changed {
            let Some(node) = self.document.get(&id).cloned() else {
                continue;
            };
            let server_id = self.store.upsert_node(&self.project, &node)?;
            self.revision += 1;
            if server_id != id {
                self.document = self.document.assign_server_id(&id, server_id.clone())?;
                renamed.push((id, server_id));
            }
        }
        if !renamed.is_empty() {
            self.recompute();
        }
        Ok(renamed)
    }

    /// Send positions that moved since the last save.
    ///
    /// On a conflict the store document is re-read into [`Self::remote`],
    /// the revision is refreshed so the next attempt can go through, and the
    /// local document is kept as is.
    pub fn save_order(&mut self) -> Result<u64> {
        let entries = changed_positions(&self.saved, &self.document);
        if entries.is_empty() {
            self.saved = self.document.clone();
            return Ok(self.revision);
        }

        match self.store.update_order(&self.project, &entries, self.revision) {
            Ok(revision) => {
                tracing::debug!(
                    project = %self.project,
                    entries = entries.len(),
                    revision,
                    "Saved ordering"
                );
                self.revision = revision;
                self.saved = self.document.clone();
                self.remote = None;
                Ok(revision)
            }
            Err(EngineError::PersistenceConflict { expected, actual }) => {
                tracing::warn!(
                    project = %self.project,
                    expected,
                    actual,
                    "Ordering conflict, local edit kept for resubmission"
                );
                let stored = self.store.fetch_document(&self.project)?;
                self.revision = stored.revision;
                self.remote = Some(stored.document);
                self.recompute();
                Err(EngineError::PersistenceConflict { expected, actual })
            }
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Situations
    // -------------------------------------------------------------------------

    /// Load or draft the situation of a month from the stored quote.
    pub fn build_situation_draft(&self, month: u32, year: i32) -> Result<Situation> {
        situation::build_situation_draft(&self.store, &self.project, month, year, &self.billing)
    }

    pub fn save_situation(&mut self, situation: &Situation) -> Result<()> {
        if situation.project != self.project {
            return Err(EngineError::ProjectNotFound(situation.project.clone()));
        }
        self.store.save_situation(&situation.to_record())
    }
}

/// Build a node for a catalog entry. The parent is set on insertion.
fn node_from_catalog(item: &CatalogItem, id: NodeId) -> Node {
    match item.kind {
        NodeKind::Part => Part::new(id, item.label.clone()).into(),
        NodeKind::Subpart => Subpart::new(id.clone(), id, item.label.clone()).into(),
        NodeKind::DetailLine => {
            let mut line = DetailLine::new(id.clone(), id, item.label.clone(), 1.0, item.unit_price);
            line.unit = item.unit.clone();
            line.into()
        }
        NodeKind::SpecialLine => {
            SpecialLine::fixed(id, Scope::Global, SpecialKind::Addition, item.unit_price)
                .with_label(item.label.clone())
                .into()
        }
    }
}
