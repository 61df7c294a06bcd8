//! Hierarchy projector
//!
//! Rebuilds the Part → Subpart → Line tree from a flat document and derives
//! display numbers ("2", "2.3", "2.3.1") from structural position.
//!
//! Numbering rules:
//! - Parts count 1, 2, 3... over numbered Parts only; unnumbered headers are
//!   skipped and leave no gap.
//! - A Subpart is numbered `"{part}.{n}"` only when its Part has a number.
//! - Lines follow the same rule one level deeper.
//! - Special lines never get a structural number; they are listed inline in
//!   their scope.
//!
//! Nodes whose parent is missing are orphans: they are excluded from the
//! tree, logged and reported, never fatal.

use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::types::{DetailLine, Node, NodeId, NodeKind, Part, Scope, SpecialLine, Subpart};
use serde::Serialize;

/// A projected Detail Line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineView {
    pub line: DetailLine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
}

/// A projected Subpart with its lines and special lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubpartView {
    pub subpart: Subpart,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
    pub lines: Vec<LineView>,
    pub specials: Vec<SpecialLine>,
}

/// A projected Part with its subparts and special lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartView {
    pub part: Part,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_number: Option<String>,
    pub subparts: Vec<SubpartView>,
    pub specials: Vec<SpecialLine>,
}

/// The quote as a tree. Every list is in position order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Tree {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub parts: Vec<PartView>,
    /// Special lines of the global scope
    pub specials: Vec<SpecialLine>,
}

/// A node left out of the tree because its parent is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Orphan {
    pub id: NodeId,
    pub kind: NodeKind,
    pub parent: Scope,
}

impl Orphan {
    pub fn to_error(&self) -> EngineError {
        EngineError::OrphanNode {
            id: self.id.to_string(),
            parent: self.parent.to_string(),
        }
    }
}

/// Result of a projection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub tree: Tree,
    pub orphans: Vec<Orphan>,
}

/// Project a flat document into its tree.
pub fn project(doc: &Document) -> Projection {
    let mut tree = Tree {
        project: doc.project().map(str::to_string),
        ..Tree::default()
    };
    let mut part_counter = 0usize;

    for node in doc.children(&Scope::Global) {
        match node {
            Node::Part(part) => {
                let display_number = part.numbered.then(|| {
                    part_counter += 1;
                    part_counter.to_string()
                });
                tree.parts.push(project_part(doc, part, display_number));
            }
            Node::SpecialLine(line) => tree.specials.push(line.clone()),
            // `children(Global)` only yields Parts and global special lines
            Node::Subpart(_) | Node::DetailLine(_) => {}
        }
    }

    let orphans = find_orphans(doc);
    for orphan in &orphans {
        tracing::warn!(
            node_id = %orphan.id,
            kind = %orphan.kind,
            parent = %orphan.parent,
            "Orphan node excluded from projection"
        );
    }

    Projection { tree, orphans }
}

fn project_part(doc: &Document, part: &Part, display_number: Option<String>) -> PartView {
    let mut view = PartView {
        part: part.clone(),
        display_number,
        subparts: Vec::new(),
        specials: Vec::new(),
    };
    let mut counter = 0usize;

    for node in doc.children(&Scope::Part(part.id.clone())) {
        match node {
            Node::Subpart(sub) => {
                let number = child_number(view.display_number.as_deref(), sub.numbered, &mut counter);
                view.subparts.push(project_subpart(doc, sub, number));
            }
            Node::SpecialLine(line) => view.specials.push(line.clone()),
            Node::Part(_) | Node::DetailLine(_) => {}
        }
    }
    view
}

fn project_subpart(doc: &Document, sub: &Subpart, display_number: Option<String>) -> SubpartView {
    let mut view = SubpartView {
        subpart: sub.clone(),
        display_number,
        lines: Vec::new(),
        specials: Vec::new(),
    };
    let mut counter = 0usize;

    for node in doc.children(&Scope::Subpart(sub.id.clone())) {
        match node {
            Node::DetailLine(line) => {
                let number = child_number(view.display_number.as_deref(), true, &mut counter);
                view.lines.push(LineView {
                    line: line.clone(),
                    display_number: number,
                });
            }
            Node::SpecialLine(line) => view.specials.push(line.clone()),
            Node::Part(_) | Node::Subpart(_) => {}
        }
    }
    view
}

/// Next child number under `parent`, or `None` if either side is unnumbered.
fn child_number(parent: Option<&str>, numbered: bool, counter: &mut usize) -> Option<String> {
    let parent = parent?;
    if !numbered {
        return None;
    }
    *counter += 1;
    Some(format!("{parent}.{counter}"))
}

/// Every node not reachable from the root, with the parent it points at.
fn find_orphans(doc: &Document) -> Vec<Orphan> {
    let reachable: std::collections::HashSet<&NodeId> =
        doc.preorder().into_iter().map(|n| n.id()).collect();
    doc.sorted()
        .into_iter()
        .filter(|n| !reachable.contains(n.id()))
        .map(|n| Orphan {
            id: n.id().clone(),
            kind: n.kind(),
            parent: n.parent(),
        })
        .collect()
}

impl Tree {
    /// Serialize the tree back to a flat document, positions preserved.
    pub fn flatten(&self) -> Result<Document> {
        let mut nodes: Vec<Node> = Vec::new();
        for part in &self.parts {
            nodes.push(part.part.clone().into());
            for sub in &part.subparts {
                nodes.push(sub.subpart.clone().into());
                nodes.extend(sub.lines.iter().map(|l| Node::from(l.line.clone())));
                nodes.extend(sub.specials.iter().cloned().map(Node::from));
            }
            nodes.extend(part.specials.iter().cloned().map(Node::from));
        }
        nodes.extend(self.specials.iter().cloned().map(Node::from));
        // Insertion order must follow document order so ties replay the same way
        nodes.sort_by(|a, b| a.cmp_order(b));
        Document::from_nodes(self.project.clone(), nodes)
    }

    /// `(id, display number)` for every structural node, in tree order.
    pub fn numbering(&self) -> Vec<(NodeId, Option<String>)> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.push((part.part.id.clone(), part.display_number.clone()));
            for sub in &part.subparts {
                out.push((sub.subpart.id.clone(), sub.display_number.clone()));
                for line in &sub.lines {
                    out.push((line.line.id.clone(), line.display_number.clone()));
                }
            }
        }
        out
    }

    /// All detail lines in tree order.
    pub fn lines(&self) -> impl Iterator<Item = &LineView> {
        self.parts
            .iter()
            .flat_map(|p| p.subparts.iter())
            .flat_map(|s| s.lines.iter())
    }

    /// All special lines in tree order (subpart, then part, then global).
    pub fn special_lines(&self) -> Vec<&SpecialLine> {
        let mut out = Vec::new();
        for part in &self.parts {
            for sub in &part.subparts {
                out.extend(sub.specials.iter());
            }
            out.extend(part.specials.iter());
        }
        out.extend(self.specials.iter());
        out
    }

    pub fn display_number(&self, id: &NodeId) -> Option<String> {
        self.numbering()
            .into_iter()
            .find(|(node_id, _)| node_id == id)
            .and_then(|(_, number)| number)
    }

    /// Render the tree as indented text, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            push_row(&mut out, 0, part.display_number.as_deref(), &part.part.title);
            for sub in &part.subparts {
                push_row(&mut out, 1, sub.display_number.as_deref(), &sub.subpart.title);
                for line in &sub.lines {
                    push_row(&mut out, 2, line.display_number.as_deref(), &line.line.designation);
                }
                for special in &sub.specials {
                    push_row(&mut out, 2, Some("*"), &special.label);
                }
            }
            for special in &part.specials {
                push_row(&mut out, 1, Some("*"), &special.label);
            }
        }
        for special in &self.specials {
            push_row(&mut out, 0, Some("*"), &special.label);
        }
        out
    }
}

fn push_row(out: &mut String, depth: usize, number: Option<&str>, label: &str) {
    out.push_str(&"  ".repeat(depth));
    if let Some(number) = number {
        out.push_str(number);
        out.push(' ');
    }
    out.push_str(label);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpecialKind;
    use pretty_assertions::assert_eq;

    fn id(i: i64) -> NodeId {
        NodeId::Server(i)
    }

    fn doc(nodes: Vec<Node>) -> Document {
        Document::from_nodes(None, nodes).unwrap()
    }

    fn numbers(tree: &Tree) -> Vec<(String, Option<String>)> {
        tree.numbering()
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect()
    }

    #[test]
    fn test_numbering_follows_position_not_insertion() {
        let d = doc(vec![
            Part::new(2, "B").at(2.0).into(),
            Part::new(1, "A").at(1.0).into(),
            Subpart::new(12, 1, "A2").at(1.2).into(),
            Subpart::new(11, 1, "A1").at(1.1).into(),
            DetailLine::new(111, 11, "l", 1.0, 1.0).at(1.11).into(),
        ]);
        let tree = project(&d).tree;
        assert_eq!(
            numbers(&tree),
            vec![
                ("1".to_string(), Some("1".to_string())),
                ("11".to_string(), Some("1.1".to_string())),
                ("111".to_string(), Some("1.1.1".to_string())),
                ("12".to_string(), Some("1.2".to_string())),
                ("2".to_string(), Some("2".to_string())),
            ]
        );
    }

    #[test]
    fn test_unnumbered_part_is_skipped_and_children_stay_unnumbered() {
        let d = doc(vec![
            Part::new(1, "Notes").unnumbered().at(1.0).into(),
            Subpart::new(11, 1, "n").at(1.1).into(),
            Part::new(2, "B").at(2.0).into(),
            Subpart::new(21, 2, "b1").unnumbered().at(2.1).into(),
            Subpart::new(22, 2, "b2").at(2.2).into(),
        ]);
        let tree = project(&d).tree;
        assert_eq!(tree.display_number(&id(1)), None);
        assert_eq!(tree.display_number(&id(11)), None);
        assert_eq!(tree.display_number(&id(2)), Some("1".to_string()));
        assert_eq!(tree.display_number(&id(21)), None);
        assert_eq!(tree.display_number(&id(22)), Some("1.1".to_string()));
    }

    #[test]
    fn test_special_lines_have_no_number_and_do_not_shift_counts() {
        let d = doc(vec![
            Part::new(1, "A").at(1.0).into(),
            SpecialLine::fixed(9, Scope::Global, SpecialKind::Reduction, 10.0).at(1.5).into(),
            Part::new(2, "B").at(2.0).into(),
        ]);
        let tree = project(&d).tree;
        assert_eq!(tree.display_number(&id(2)), Some("2".to_string()));
        assert_eq!(tree.specials.len(), 1);
    }

    #[test]
    fn test_orphans_are_reported_not_fatal() {
        let d = doc(vec![
            Part::new(1, "A").at(1.0).into(),
            Subpart::new(11, 1, "A1").at(1.1).into(),
            Subpart::new(31, 3, "lost").at(3.1).into(),
            DetailLine::new(311, 31, "lost line", 1.0, 1.0).at(3.11).into(),
            SpecialLine::fixed(8, Scope::Part(id(4)), SpecialKind::Addition, 1.0).at(4.5).into(),
        ]);
        let projection = project(&d);
        assert_eq!(projection.tree.parts.len(), 1);
        let orphan_ids: Vec<String> = projection.orphans.iter().map(|o| o.id.to_string()).collect();
        assert_eq!(orphan_ids, vec!["31", "311", "8"]);
        assert!(matches!(
            projection.orphans[0].to_error(),
            EngineError::OrphanNode { .. }
        ));
    }

    #[test]
    fn test_projection_is_idempotent() {
        let d = doc(vec![
            Part::new(1, "A").at(1.0).into(),
            Subpart::new(11, 1, "A1").at(1.1).into(),
            DetailLine::new(111, 11, "l", 1.0, 1.0).at(1.11).into(),
            SpecialLine::display(5, Scope::Subpart(id(11))).at(1.19).into(),
            Part::new(2, "B").at(2.0).into(),
        ]);
        let first = project(&d).tree;
        let again = project(&first.flatten().unwrap()).tree;
        assert_eq!(first.numbering(), again.numbering());
        assert_eq!(first, again);
    }

    #[test]
    fn test_render_outline() {
        let d = doc(vec![
            Part::new(1, "Gros oeuvre").at(1.0).into(),
            Subpart::new(11, 1, "Fondations").at(1.1).into(),
            DetailLine::new(111, 11, "Béton", 1.0, 1.0).at(1.11).into(),
        ]);
        assert_eq!(
            project(&d).tree.render(),
            "1 Gros oeuvre\n  1.1 Fondations\n    1.1.1 Béton\n"
        );
    }
}
