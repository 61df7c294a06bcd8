//! Quote document
//!
//! A [`Document`] is an immutable value holding the flat node collection of
//! one quote. Edit operations never mutate in place: they return a new
//! document, so every derived state (tree, bases, totals) can be recomputed
//! from a value that no one else is changing underneath.
//!
//! Document order is the pre-order walk of the hierarchy, with siblings
//! sorted by `(position, insertion sequence)`.

use crate::config;
use crate::error::{EngineError, Result};
use crate::types::{Node, NodeId, NodeKind, Scope, TEMP_ID_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

/// On-disk representation of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default)]
    nodes: Vec<Node>,
}

/// Flat, position-ordered collection of quote nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    project: Option<String>,
    nodes: Vec<Node>,
    next_seq: u64,
    next_temp: u64,
}

impl Document {
    /// Create an empty document for `project`.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Self::default()
        }
    }

    /// Build a document from nodes, in insertion order.
    ///
    /// Fails on duplicate ids, non-finite positions or too many nodes.
    pub fn from_nodes(project: Option<String>, nodes: Vec<Node>) -> Result<Self> {
        if nodes.len() > config::MAX_NODES {
            return Err(EngineError::LimitExceeded(format!(
                "Too many nodes ({}, max {})",
                nodes.len(),
                config::MAX_NODES
            )));
        }

        let mut seen = HashSet::new();
        for node in &nodes {
            if !node.position().is_finite() {
                return Err(EngineError::LoadError(format!(
                    "Node {} has a non-finite position",
                    node.id()
                )));
            }
            if !seen.insert(node.id().clone()) {
                return Err(EngineError::LoadError(format!(
                    "Duplicate node id {}",
                    node.id()
                )));
            }
        }

        let mut doc = Self {
            project,
            nodes: Vec::with_capacity(nodes.len()),
            next_seq: 0,
            next_temp: 0,
        };
        for node in nodes {
            doc.push(node);
        }
        Ok(doc)
    }

    /// Load a document from a YAML or JSON file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        tracing::debug!(path = %path_ref.display(), "Loading document");

        let metadata = fs::metadata(path_ref)
            .map_err(|_| EngineError::LoadError("Failed to access document file".to_string()))?;
        let file_size = metadata.len() as usize;
        if file_size > config::MAX_DOCUMENT_SIZE {
            tracing::warn!(
                size = file_size,
                max = config::MAX_DOCUMENT_SIZE,
                "Document file exceeds size limit"
            );
            return Err(EngineError::LoadError(format!(
                "File exceeds maximum size limit ({} bytes)",
                config::MAX_DOCUMENT_SIZE
            )));
        }

        let content = fs::read_to_string(path_ref)?;
        match path_ref.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Parse a document from YAML.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        check_size(content)?;
        let file: DocumentFile = serde_yaml_ng::from_str(content)?;
        let doc = Self::from_nodes(file.project, file.nodes)?;
        tracing::debug!(nodes = doc.len(), "Parsed document");
        Ok(doc)
    }

    /// Parse a document from JSON.
    pub fn from_json_str(content: &str) -> Result<Self> {
        check_size(content)?;
        let file: DocumentFile = serde_json::from_str(content)?;
        Self::from_nodes(file.project, file.nodes)
    }

    /// Parse a document from an already decoded JSON value.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        let file: DocumentFile = serde_json::from_value(value)?;
        Self::from_nodes(file.project, file.nodes)
    }

    /// Serialize to YAML, nodes in document order.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(&self.to_file())?)
    }

    /// Serialize to pretty-printed JSON, nodes in document order.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }

    fn to_file(&self) -> DocumentFile {
        DocumentFile {
            project: self.project.clone(),
            nodes: self.sorted().into_iter().cloned().collect(),
        }
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id() == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    /// All nodes sorted by position, ties broken by insertion order.
    pub fn sorted(&self) -> Vec<&Node> {
        let mut sorted: Vec<&Node> = self.nodes.iter().collect();
        sorted.sort_by(|a, b| a.cmp_order(b));
        sorted
    }

    /// Whether `scope` exists: the root always does, Parts and Subparts
    /// must be present with the matching kind.
    pub fn scope_exists(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Global => true,
            Scope::Part(id) => matches!(self.get(id), Some(Node::Part(_))),
            Scope::Subpart(id) => matches!(self.get(id), Some(Node::Subpart(_))),
        }
    }

    /// Direct children of `scope`, in document order.
    pub fn children(&self, scope: &Scope) -> Vec<&Node> {
        let mut children: Vec<&Node> = self.nodes.iter().filter(|n| &n.parent() == scope).collect();
        children.sort_by(|a, b| a.cmp_order(b));
        children
    }

    /// Pre-order walk of every node reachable from the root.
    ///
    /// Nodes whose ancestry is broken are not reachable and are skipped.
    pub fn preorder(&self) -> Vec<&Node> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(&Scope::Global, &mut out);
        out
    }

    /// Pre-order walk of the subtree below `scope` (excluding its owner).
    pub fn preorder_within(&self, scope: &Scope) -> Vec<&Node> {
        let mut out = Vec::new();
        self.walk(scope, &mut out);
        out
    }

    fn walk<'a>(&'a self, scope: &Scope, out: &mut Vec<&'a Node>) {
        for child in self.children(scope) {
            out.push(child);
            if let Some(inner) = child.as_scope() {
                self.walk(&inner, out);
            }
        }
    }

    /// Ids of `id` and all of its descendants, in pre-order.
    pub fn subtree_ids(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        let mut ids = vec![node.id().clone()];
        if let Some(scope) = node.as_scope() {
            ids.extend(self.preorder_within(&scope).into_iter().map(|n| n.id().clone()));
        }
        ids
    }

    /// Remove a node with cascade.
    ///
    /// Removing a Part drops its Subparts, their lines and every special line
    /// scoped to any of them; removing a Subpart drops its lines and its
    /// special lines. Returns the new document and the removed ids.
    pub fn remove(&self, id: &NodeId) -> Result<(Document, Vec<NodeId>)> {
        if !self.contains(id) {
            return Err(EngineError::NodeNotFound(id.to_string()));
        }
        let removed = self.subtree_ids(id);
        let gone: BTreeSet<&NodeId> = removed.iter().collect();

        let mut next = self.clone();
        next.nodes.retain(|n| !gone.contains(n.id()));

        let dangling = next
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::SpecialLine(line) => line.base_ref.as_ref(),
                _ => None,
            })
            .filter(|base| base.owner().is_some_and(|owner| gone.contains(owner)))
            .count();
        if dangling > 0 {
            tracing::warn!(
                removed = %id,
                dangling,
                "Special lines still reference a removed scope as percentage base"
            );
        }

        tracing::debug!(node_id = %id, removed = removed.len(), "Removed node");
        Ok((next, removed))
    }

    /// Return a copy with `edit` applied to node `id`.
    ///
    /// The edit may not change the node's id or kind.
    pub fn update<F>(&self, id: &NodeId, edit: F) -> Result<Document>
    where
        F: FnOnce(&mut Node),
    {
        let mut next = self.clone();
        let node = next
            .get_mut(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;
        let kind = node.kind();
        edit(node);
        if node.id() != id || node.kind() != kind {
            return Err(EngineError::InvalidTarget(format!(
                "Edit of {id} changed its identity"
            )));
        }
        if !node.position().is_finite() {
            return Err(EngineError::InvalidTarget(format!(
                "Edit of {id} produced a non-finite position"
            )));
        }
        Ok(next)
    }

    /// Return a copy with `node` replacing the node of the same id, or
    /// appended when the id is new.
    ///
    /// A replaced node keeps its insertion sequence.
    pub fn upsert(&self, node: Node) -> Result<Document> {
        if !node.position().is_finite() {
            return Err(EngineError::InvalidTarget(format!(
                "Node {} has a non-finite position",
                node.id()
            )));
        }
        let mut next = self.clone();
        match next.get_mut(node.id()) {
            Some(existing) => {
                if existing.kind() != node.kind() {
                    return Err(EngineError::InvalidTarget(format!(
                        "Node {} cannot change kind",
                        node.id()
                    )));
                }
                let seq = existing.seq();
                *existing = node;
                existing.set_seq(seq);
            }
            None => {
                if next.nodes.len() >= config::MAX_NODES {
                    return Err(EngineError::LimitExceeded(format!(
                        "Document already holds {} nodes",
                        config::MAX_NODES
                    )));
                }
                next.push(node);
            }
        }
        Ok(next)
    }

    /// Replace a temporary id with the id assigned by the server.
    ///
    /// Every parent, scope and base reference to the old id follows.
    pub fn assign_server_id(&self, temp: &NodeId, server: NodeId) -> Result<Document> {
        if !self.contains(temp) {
            return Err(EngineError::NodeNotFound(temp.to_string()));
        }
        if self.contains(&server) {
            return Err(EngineError::LoadError(format!("Node id {server} already in use")));
        }
        let mut next = self.clone();
        for node in &mut next.nodes {
            node.rename_references(temp, &server);
        }
        Ok(next)
    }

    /// Generate a fresh temporary id for a node created locally.
    pub fn temp_id(&mut self) -> NodeId {
        loop {
            self.next_temp += 1;
            let candidate = NodeId::Temp(format!("{TEMP_ID_PREFIX}{}", self.next_temp));
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Number of nodes of the given kind.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind() == kind).count()
    }

    /// Append a node, stamping it with the next insertion sequence.
    pub(crate) fn push(&mut self, mut node: Node) {
        node.set_seq(self.next_seq);
        self.next_seq += 1;
        self.nodes.push(node);
    }
}

fn check_size(content: &str) -> Result<()> {
    if content.len() > config::MAX_DOCUMENT_SIZE {
        tracing::warn!(
            size = content.len(),
            max = config::MAX_DOCUMENT_SIZE,
            "Document content exceeds size limit"
        );
        return Err(EngineError::LoadError(format!(
            "Document content exceeds maximum size limit ({} bytes)",
            config::MAX_DOCUMENT_SIZE
        )));
    }
    Ok(())
}
