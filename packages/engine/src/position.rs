//! Position index
//!
//! Assigns `position` values so that sorting the flat node collection
//! reproduces document order, and keeps that true under insertion and
//! drag-and-drop.
//!
//! # Spacing
//!
//! Children of a scope at depth `d` are spaced by `0.1^d`: Parts at `1.0`,
//! `2.0`, Subparts of Part `2.0` at `2.1`, `2.2`, lines of Subpart `2.1` at
//! `2.11`, `2.12`. A node inserted between two neighbours takes that spacing
//! when it fits, and otherwise bisects the gap. Only the inserted (or moved)
//! nodes change position.
//!
//! # Renumbering
//!
//! When the gap is exhausted (below [`config::MIN_POSITION_GAP`]) or sibling
//! positions collide, the smallest enclosing scope is renumbered with fresh
//! spacing. If that scope has no room within its own bounds the next
//! enclosing scope is tried, up to the document root.

use crate::config;
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::types::{Node, NodeId, NodeKind, Scope};
use std::collections::BTreeSet;

/// Where a node should land.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetPosition {
    /// Directly after a node (after its whole subtree for Parts and Subparts).
    ///
    /// If the node's own scope cannot hold the dragged kind but the node is a
    /// container that can, this means "first child of that node".
    After(NodeId),
    /// As first child of a scope
    FirstChildOf(Scope),
    /// As last child of a scope
    LastChildOf(Scope),
    /// At the end of the document, in the last scope that can hold the node
    End,
}

/// Outcome of an insertion or a move.
#[derive(Debug, Clone)]
pub struct Placement {
    /// The new document value
    pub document: Document,
    /// Id of the inserted or moved node
    pub node_id: NodeId,
    /// Scope the node now lives in
    pub scope: Scope,
    /// New position of the node
    pub position: f64,
    /// Scope that had to be renumbered to make room, if any
    pub renumbered: Option<Scope>,
}

/// Resolved target: a scope and an index among its children.
#[derive(Debug, Clone, PartialEq)]
struct Slot {
    scope: Scope,
    index: usize,
}

/// Insert a new node at `target`.
///
/// The node's parent reference is overwritten with the target scope and its
/// position with a fresh value. Other nodes keep their positions unless the
/// local scope had to be renumbered.
pub fn insert_at(doc: &Document, node: Node, target: &TargetPosition) -> Result<Placement> {
    let id = node.id().clone();
    if doc.contains(&id) {
        return Err(EngineError::InvalidTarget(format!("Node {id} already exists")));
    }
    if doc.len() >= config::MAX_NODES {
        return Err(EngineError::LimitExceeded(format!(
            "Document already holds {} nodes",
            config::MAX_NODES
        )));
    }

    let kind = node.kind();
    let moving = vec![id.clone()];
    let moving_set: BTreeSet<&NodeId> = moving.iter().collect();
    let slot = resolve_target(doc, kind, target, &moving_set)?;

    let mut next = doc.clone();
    let mut node = node;
    node.set_parent(slot.scope.clone())?;
    next.push(node);

    let renumbered = place(&mut next, &slot, &moving)?;
    let renumbered = settle_ties(&mut next, &slot.scope, renumbered);
    finish(next, id, slot.scope, renumbered)
}

/// Move `dragged` (with its subtree) to `target`, updating its parent.
pub fn reorder(doc: &Document, dragged: &NodeId, target: &TargetPosition) -> Result<Placement> {
    let node = doc
        .get(dragged)
        .ok_or_else(|| EngineError::NodeNotFound(dragged.to_string()))?;
    let kind = node.kind();
    let moving = doc.subtree_ids(dragged);
    let moving_set: BTreeSet<&NodeId> = moving.iter().collect();
    let slot = resolve_target(doc, kind, target, &moving_set)?;

    let mut next = doc.clone();
    if let Some(node) = next.get_mut(dragged) {
        node.set_parent(slot.scope.clone())?;
    }

    let renumbered = place(&mut next, &slot, &moving)?;
    let renumbered = settle_ties(&mut next, &slot.scope, renumbered);
    tracing::debug!(
        node_id = %dragged,
        scope = %slot.scope,
        index = slot.index,
        moved = moving.len(),
        "Reordered node"
    );
    finish(next, dragged.clone(), slot.scope, renumbered)
}

/// Renumber every node below `scope` with fresh spacing, keeping order.
///
/// Escalates to the enclosing scope when `scope` has no room within its
/// bounds.
pub fn renumber_scope(doc: &Document, scope: &Scope) -> Result<Document> {
    if !doc.scope_exists(scope) {
        return Err(EngineError::NodeNotFound(scope.to_string()));
    }
    let mut next = doc.clone();
    renumber_escalating(&mut next, scope, &BTreeSet::new());
    Ok(next)
}

/// Renumber every scope whose children share a position.
///
/// Tied siblings are first ordered by insertion sequence, which the sort
/// already does; renumbering makes that order explicit in the positions.
pub fn resolve_ties(doc: &Document) -> Document {
    let mut next = doc.clone();
    let mut scopes = vec![Scope::Global];
    scopes.extend(doc.preorder().iter().filter_map(|n| n.as_scope()));

    for scope in scopes {
        if has_sibling_tie(&next, &scope) {
            tracing::warn!(scope = %scope, "Sibling positions collide, renumbering scope");
            renumber_escalating(&mut next, &scope, &BTreeSet::new());
        }
    }
    next
}

fn finish(
    document: Document,
    node_id: NodeId,
    scope: Scope,
    renumbered: Option<Scope>,
) -> Result<Placement> {
    let position = document
        .get(&node_id)
        .map(|n| n.position())
        .ok_or_else(|| EngineError::NodeNotFound(node_id.to_string()))?;
    Ok(Placement {
        document,
        node_id,
        scope,
        position,
        renumbered,
    })
}

/// Renumber the target scope if its siblings still share a position.
fn settle_ties(doc: &mut Document, scope: &Scope, renumbered: Option<Scope>) -> Option<Scope> {
    if renumbered.is_some() || !has_sibling_tie(doc, scope) {
        return renumbered;
    }
    tracing::warn!(scope = %scope, "Sibling positions collide, renumbering scope");
    Some(renumber_escalating(doc, scope, &BTreeSet::new()))
}

fn has_sibling_tie(doc: &Document, scope: &Scope) -> bool {
    doc.children(scope)
        .windows(2)
        .any(|pair| pair[0].position() == pair[1].position())
}

// =============================================================================
// Target resolution
// =============================================================================

fn resolve_target(
    doc: &Document,
    kind: NodeKind,
    target: &TargetPosition,
    moving: &BTreeSet<&NodeId>,
) -> Result<Slot> {
    match target {
        TargetPosition::FirstChildOf(scope) => {
            check_scope(doc, scope, kind, moving)?;
            Ok(Slot {
                scope: scope.clone(),
                index: 0,
            })
        }
        TargetPosition::LastChildOf(scope) => {
            check_scope(doc, scope, kind, moving)?;
            Ok(Slot {
                scope: scope.clone(),
                index: siblings(doc, scope, moving).len(),
            })
        }
        TargetPosition::After(anchor) => {
            if moving.contains(anchor) {
                return Err(EngineError::InvalidTarget(format!(
                    "Cannot place a node after itself or its own descendant ({anchor})"
                )));
            }
            let anchor_node = doc
                .get(anchor)
                .ok_or_else(|| EngineError::NodeNotFound(anchor.to_string()))?;

            let parent = anchor_node.parent();
            if parent.accepts(kind) && check_scope(doc, &parent, kind, moving).is_ok() {
                let index = siblings(doc, &parent, moving)
                    .iter()
                    .position(|n| n.id() == anchor)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                return Ok(Slot {
                    scope: parent,
                    index,
                });
            }

            match anchor_node.as_scope() {
                Some(inner) if inner.accepts(kind) => Ok(Slot {
                    scope: inner,
                    index: 0,
                }),
                _ => Err(EngineError::InvalidTarget(format!(
                    "A {kind} cannot be placed after {} {anchor}",
                    anchor_node.kind()
                ))),
            }
        }
        TargetPosition::End => {
            let scope = end_scope(doc, kind, moving)?;
            let index = siblings(doc, &scope, moving).len();
            Ok(Slot { scope, index })
        }
    }
}

fn check_scope(doc: &Document, scope: &Scope, kind: NodeKind, moving: &BTreeSet<&NodeId>) -> Result<()> {
    if !doc.scope_exists(scope) {
        return Err(EngineError::NodeNotFound(scope.to_string()));
    }
    if !scope.accepts(kind) {
        return Err(EngineError::InvalidTarget(format!("{scope} cannot hold a {kind}")));
    }
    if scope.owner().is_some_and(|owner| moving.contains(owner)) {
        return Err(EngineError::InvalidTarget(format!(
            "Cannot move a node into its own subtree ({scope})"
        )));
    }
    Ok(())
}

/// The last scope in document order that can hold `kind`.
fn end_scope(doc: &Document, kind: NodeKind, moving: &BTreeSet<&NodeId>) -> Result<Scope> {
    let wanted = match kind {
        NodeKind::Part | NodeKind::SpecialLine => return Ok(Scope::Global),
        NodeKind::Subpart => NodeKind::Part,
        NodeKind::DetailLine => NodeKind::Subpart,
    };
    doc.preorder()
        .into_iter()
        .rev()
        .filter(|n| n.kind() == wanted && !moving.contains(n.id()))
        .find_map(|n| n.as_scope())
        .ok_or_else(|| EngineError::InvalidTarget(format!("No {wanted} to hold a {kind}")))
}

fn siblings<'a>(doc: &'a Document, scope: &Scope, moving: &BTreeSet<&NodeId>) -> Vec<&'a Node> {
    doc.children(scope)
        .into_iter()
        .filter(|n| !moving.contains(n.id()))
        .collect()
}

/// The scope enclosing `scope`, `None` at the root.
fn enclosing_scope(doc: &Document, scope: &Scope) -> Option<Scope> {
    match scope {
        Scope::Global => None,
        Scope::Part(_) => Some(Scope::Global),
        Scope::Subpart(id) => doc.get(id).map(|n| n.parent()),
    }
}

// =============================================================================
// Position assignment
// =============================================================================

/// `count` strictly increasing positions inside `(lower, upper)`.
///
/// Unbounded sides are extended by `eps` steps. Returns `None` when the
/// bounded gap cannot hold them at [`config::MIN_POSITION_GAP`] spacing.
fn spread(lower: Option<f64>, upper: Option<f64>, count: usize, eps: f64) -> Option<Vec<f64>> {
    let n = count as f64;
    let positions: Vec<f64> = match (lower, upper) {
        (None, None) => (1..=count).map(|i| i as f64 * eps).collect(),
        (Some(l), None) => (1..=count).map(|i| l + i as f64 * eps).collect(),
        (None, Some(u)) => (1..=count).map(|i| u - (n + 1.0 - i as f64) * eps).collect(),
        (Some(l), Some(u)) => {
            let step = eps.min((u - l) / (n + 1.0));
            if !(step >= config::MIN_POSITION_GAP) {
                return None;
            }
            (1..=count).map(|i| l + i as f64 * step).collect()
        }
    };

    // Guard against float precision collapsing neighbours
    let mut previous = lower;
    for &p in &positions {
        if !p.is_finite() || previous.is_some_and(|prev| p <= prev) {
            return None;
        }
        previous = Some(p);
    }
    if let (Some(last), Some(u)) = (positions.last(), upper) {
        if *last >= u {
            return None;
        }
    }
    Some(positions)
}

/// Bounds of the gap a slot opens: the position of the node it follows and
/// of the node that currently follows that one in document order.
fn slot_bounds(doc: &Document, slot: &Slot, moving: &BTreeSet<&NodeId>) -> (Option<f64>, Option<f64>) {
    let order: Vec<&Node> = doc
        .preorder()
        .into_iter()
        .filter(|n| !moving.contains(n.id()))
        .collect();
    let children = siblings(doc, &slot.scope, moving);

    let anchor: Option<&NodeId> = if slot.index == 0 {
        slot.scope.owner()
    } else {
        children.get(slot.index - 1).map(|prev| last_in_subtree(doc, prev.id(), moving))
    };

    match anchor {
        None => (None, order.first().map(|n| n.position())),
        Some(anchor) => {
            let idx = order.iter().position(|n| n.id() == anchor);
            let lower = doc.get(anchor).map(|n| n.position());
            let upper = idx.and_then(|i| order.get(i + 1)).map(|n| n.position());
            (lower, upper)
        }
    }
}

fn last_in_subtree<'a>(doc: &'a Document, id: &'a NodeId, moving: &BTreeSet<&NodeId>) -> &'a NodeId {
    let Some(scope) = doc.get(id).and_then(|n| n.as_scope()) else {
        return id;
    };
    doc.preorder_within(&scope)
        .into_iter()
        .filter(|n| !moving.contains(n.id()))
        .last()
        .map(|n| n.id())
        .unwrap_or(id)
}

/// Bounds of everything below `scope`: its owner and the node following its
/// subtree in document order.
fn scope_bounds(doc: &Document, scope: &Scope, moving: &BTreeSet<&NodeId>) -> (Option<f64>, Option<f64>) {
    let Some(owner) = scope.owner() else {
        return (None, None);
    };
    let lower = doc.get(owner).map(|n| n.position());
    let end = last_in_subtree(doc, owner, moving);
    let order: Vec<&Node> = doc
        .preorder()
        .into_iter()
        .filter(|n| !moving.contains(n.id()))
        .collect();
    let upper = order
        .iter()
        .position(|n| n.id() == end)
        .and_then(|i| order.get(i + 1))
        .map(|n| n.position());
    (lower, upper)
}

/// Positions for the moving nodes: the root in the slot, its descendants
/// between the root and the slot's upper bound.
fn compute_placement(
    doc: &Document,
    slot: &Slot,
    moving: &[NodeId],
) -> Option<Vec<(NodeId, f64)>> {
    let moving_set: BTreeSet<&NodeId> = moving.iter().collect();
    let (lower, upper) = slot_bounds(doc, slot, &moving_set);
    let depth = slot.scope.depth();
    let eps = config::epsilon_for_depth(depth);

    let (root, descendants) = moving.split_first()?;
    let root_pos = *spread(lower, upper, 1, eps)?.first()?;
    let mut out = vec![(root.clone(), root_pos)];

    if !descendants.is_empty() {
        let desc_upper = upper.unwrap_or(root_pos + eps);
        let child_eps = config::epsilon_for_depth(depth + 1);
        let positions = spread(Some(root_pos), Some(desc_upper), descendants.len(), child_eps)?;
        out.extend(descendants.iter().cloned().zip(positions));
    }
    Some(out)
}

fn apply(doc: &mut Document, assignments: &[(NodeId, f64)]) {
    for (id, position) in assignments {
        if let Some(node) = doc.get_mut(id) {
            node.set_position(*position);
        }
    }
}

/// Place the moving nodes, renumbering outward until they fit.
fn place(doc: &mut Document, slot: &Slot, moving: &[NodeId]) -> Result<Option<Scope>> {
    if let Some(assignments) = compute_placement(doc, slot, moving) {
        apply(doc, &assignments);
        return Ok(None);
    }

    let moving_set: BTreeSet<&NodeId> = moving.iter().collect();
    let mut scope = Some(slot.scope.clone());
    while let Some(current) = scope {
        tracing::debug!(scope = %current, "Position gap exhausted, renumbering scope");
        let renumbered = renumber_escalating(doc, &current, &moving_set);
        if let Some(assignments) = compute_placement(doc, slot, moving) {
            apply(doc, &assignments);
            return Ok(Some(renumbered));
        }
        scope = enclosing_scope(doc, &renumbered);
    }

    Err(EngineError::Computation(format!(
        "No room to place node in {}",
        slot.scope
    )))
}

/// Renumber `scope`, moving outward until a scope has room. Returns the
/// scope that was actually renumbered.
fn renumber_escalating(doc: &mut Document, scope: &Scope, moving: &BTreeSet<&NodeId>) -> Scope {
    let mut current = scope.clone();
    loop {
        let (lower, upper) = scope_bounds(doc, &current, moving);
        if let Some(assignments) = respace(doc, &current, lower, upper, moving) {
            apply(doc, &assignments);
            return current;
        }
        match enclosing_scope(doc, &current) {
            Some(outer) => current = outer,
            None => {
                flat_renumber(doc, moving);
                return Scope::Global;
            }
        }
    }
}

/// Hierarchical spacing of `scope`'s subtree within `(lower, upper)`.
fn respace(
    doc: &Document,
    scope: &Scope,
    lower: Option<f64>,
    upper: Option<f64>,
    moving: &BTreeSet<&NodeId>,
) -> Option<Vec<(NodeId, f64)>> {
    let children = siblings(doc, scope, moving);
    if children.is_empty() {
        return Some(Vec::new());
    }
    let eps = config::epsilon_for_depth(scope.depth());
    let positions = spread(lower, upper, children.len(), eps)?;

    let mut out = Vec::new();
    for (i, child) in children.iter().enumerate() {
        let position = positions[i];
        out.push((child.id().clone(), position));
        if let Some(inner) = child.as_scope() {
            let bound = positions.get(i + 1).copied().or(upper).unwrap_or(position + eps);
            out.extend(respace(doc, &inner, Some(position), Some(bound), moving)?);
        }
    }
    Some(out)
}

/// Last resort: unit spacing over the whole document in pre-order.
fn flat_renumber(doc: &mut Document, moving: &BTreeSet<&NodeId>) {
    tracing::warn!("Renumbering the whole document");
    let ids: Vec<NodeId> = doc
        .preorder()
        .into_iter()
        .filter(|n| !moving.contains(n.id()))
        .map(|n| n.id().clone())
        .collect();
    let assignments: Vec<(NodeId, f64)> = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, (i + 1) as f64))
        .collect();
    apply(doc, &assignments);
}
