//! Core types for the devis engine
//!
//! A quote is stored as a flat collection of [`Node`]s. Each node carries a
//! global `position` (the `index_global` of the persisted record) and a
//! reference to its parent; the hierarchy is rebuilt by the projector.

use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Prefix of identifiers generated locally before persistence.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Opaque node identifier.
///
/// Either assigned by the server, or a temporary token (`tmp-<n>`) for nodes
/// created locally and not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "RawNodeId")]
pub enum NodeId {
    Server(i64),
    Temp(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNodeId {
    Int(i64),
    Str(String),
}

impl TryFrom<RawNodeId> for NodeId {
    type Error = EngineError;

    fn try_from(raw: RawNodeId) -> Result<Self> {
        match raw {
            RawNodeId::Int(i) => Ok(NodeId::Server(i)),
            RawNodeId::Str(s) => s.parse(),
        }
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            NodeId::Server(i) => serializer.serialize_i64(*i),
            NodeId::Temp(token) => serializer.serialize_str(token),
        }
    }
}

impl NodeId {
    /// Whether this id still has to be replaced by a server id.
    pub fn is_temporary(&self) -> bool {
        matches!(self, NodeId::Temp(_))
    }
}

impl From<i64> for NodeId {
    fn from(i: i64) -> Self {
        NodeId::Server(i)
    }
}

impl FromStr for NodeId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Ok(NodeId::Server(i));
        }
        if s.starts_with(TEMP_ID_PREFIX) && s.len() > TEMP_ID_PREFIX.len() {
            return Ok(NodeId::Temp(s.to_string()));
        }
        Err(EngineError::LoadError(format!("Invalid node id '{s}'")))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Server(i) => write!(f, "{i}"),
            NodeId::Temp(token) => f.write_str(token),
        }
    }
}

/// A container in the document: the document root, a Part or a Subpart.
///
/// Used both as the parent of a node and as the base reference of a
/// percentage special line. Serialized as `global`, `part:<id>` or
/// `subpart:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Global,
    Part(NodeId),
    Subpart(NodeId),
}

impl Scope {
    /// Nesting depth of the scope (0 for the document root).
    pub fn depth(&self) -> usize {
        match self {
            Scope::Global => 0,
            Scope::Part(_) => 1,
            Scope::Subpart(_) => 2,
        }
    }

    /// Whether a node of `kind` may live directly inside this scope.
    pub fn accepts(&self, kind: NodeKind) -> bool {
        matches!(
            (self, kind),
            (_, NodeKind::SpecialLine)
                | (Scope::Global, NodeKind::Part)
                | (Scope::Part(_), NodeKind::Subpart)
                | (Scope::Subpart(_), NodeKind::DetailLine)
        )
    }

    /// Id of the node that owns this scope, `None` for the root.
    pub fn owner(&self) -> Option<&NodeId> {
        match self {
            Scope::Global => None,
            Scope::Part(id) | Scope::Subpart(id) => Some(id),
        }
    }

    /// Short name of the scope kind (`global`, `part`, `subpart`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Part(_) => "part",
            Scope::Subpart(_) => "subpart",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Part(id) => write!(f, "part:{id}"),
            Scope::Subpart(id) => write!(f, "subpart:{id}"),
        }
    }
}

impl FromStr for Scope {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "global" {
            return Ok(Scope::Global);
        }
        match s.split_once(':') {
            Some(("part", id)) => Ok(Scope::Part(id.parse()?)),
            Some(("subpart", id)) => Ok(Scope::Subpart(id.parse()?)),
            _ => Err(EngineError::LoadError(format!("Invalid scope '{s}'"))),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Kind tag of a node, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Part,
    Subpart,
    DetailLine,
    SpecialLine,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Part => "part",
            NodeKind::Subpart => "subpart",
            NodeKind::DetailLine => "detail_line",
            NodeKind::SpecialLine => "special_line",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect of a special line on the running total of its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKind {
    Addition,
    Reduction,
    /// Informational only, shows the running total at its position
    Display,
}

impl SpecialKind {
    /// Sign applied to the line amount: `+1`, `-1`, or `0` for display lines.
    pub fn sign(&self) -> f64 {
        match self {
            SpecialKind::Addition => 1.0,
            SpecialKind::Reduction => -1.0,
            SpecialKind::Display => 0.0,
        }
    }
}

/// How a special line's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Fixed,
    Percentage,
}

fn default_true() -> bool {
    true
}

fn is_true(b: &bool) -> bool {
    *b
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// Top-level section of a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: NodeId,
    #[serde(default)]
    pub title: String,
    pub position: f64,
    /// Informational headers are left unnumbered
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub numbered: bool,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Part {
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            position: 0.0,
            numbered: true,
            seq: 0,
        }
    }

    pub fn unnumbered(mut self) -> Self {
        self.numbered = false;
        self
    }

    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

/// Section of a Part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpart {
    pub id: NodeId,
    pub part: NodeId,
    #[serde(default)]
    pub title: String,
    pub position: f64,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub numbered: bool,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Subpart {
    pub fn new(id: impl Into<NodeId>, part: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            part: part.into(),
            title: title.into(),
            position: 0.0,
            numbered: true,
            seq: 0,
        }
    }

    pub fn unnumbered(mut self) -> Self {
        self.numbered = false;
        self
    }

    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

/// Costed line of a Subpart.
///
/// The unit price is either `price_override`, or derived from labor and
/// material cost with fixed-rate and margin percentages on top. When both
/// cost components are zero, `manual_base_price` stands in for their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailLine {
    pub id: NodeId,
    pub subpart: NodeId,
    #[serde(default)]
    pub designation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub position: f64,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_override: Option<f64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub labor_cost: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub material_cost: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fixed_rate_pct: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub margin_pct: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub manual_base_price: f64,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl DetailLine {
    /// Line with an explicit unit price.
    pub fn new(
        id: impl Into<NodeId>,
        subpart: impl Into<NodeId>,
        designation: impl Into<String>,
        quantity: f64,
        unit_price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            subpart: subpart.into(),
            designation: designation.into(),
            unit: None,
            position: 0.0,
            quantity,
            price_override: Some(unit_price),
            labor_cost: 0.0,
            material_cost: 0.0,
            fixed_rate_pct: 0.0,
            margin_pct: 0.0,
            manual_base_price: 0.0,
            seq: 0,
        }
    }

    /// Replace the explicit price with cost components.
    pub fn with_costs(mut self, labor: f64, material: f64, fixed_rate_pct: f64, margin_pct: f64) -> Self {
        self.price_override = None;
        self.labor_cost = labor;
        self.material_cost = material;
        self.fixed_rate_pct = fixed_rate_pct;
        self.margin_pct = margin_pct;
        self
    }

    pub fn with_manual_base_price(mut self, price: f64) -> Self {
        self.manual_base_price = price;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

/// Cross-cutting adjustment attached to a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialLine {
    pub id: NodeId,
    pub scope: Scope,
    #[serde(default)]
    pub label: String,
    pub position: f64,
    pub kind: SpecialKind,
    pub value_type: ValueType,
    #[serde(default)]
    pub value: f64,
    /// Scope whose raw amount is the percentage base (percentage lines only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<Scope>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl SpecialLine {
    pub fn fixed(id: impl Into<NodeId>, scope: Scope, kind: SpecialKind, value: f64) -> Self {
        Self {
            id: id.into(),
            scope,
            label: String::new(),
            position: 0.0,
            kind,
            value_type: ValueType::Fixed,
            value,
            base_ref: None,
            seq: 0,
        }
    }

    pub fn percentage(
        id: impl Into<NodeId>,
        scope: Scope,
        kind: SpecialKind,
        value: f64,
        base_ref: Scope,
    ) -> Self {
        Self {
            value_type: ValueType::Percentage,
            base_ref: Some(base_ref),
            ..Self::fixed(id, scope, kind, value)
        }
    }

    /// Display line showing the running total at its position.
    pub fn display(id: impl Into<NodeId>, scope: Scope) -> Self {
        Self::fixed(id, scope, SpecialKind::Display, 0.0)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

/// A document node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Part(Part),
    Subpart(Subpart),
    DetailLine(DetailLine),
    SpecialLine(SpecialLine),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Part(n) => &n.id,
            Node::Subpart(n) => &n.id,
            Node::DetailLine(n) => &n.id,
            Node::SpecialLine(n) => &n.id,
        }
    }

    pub(crate) fn id_mut(&mut self) -> &mut NodeId {
        match self {
            Node::Part(n) => &mut n.id,
            Node::Subpart(n) => &mut n.id,
            Node::DetailLine(n) => &mut n.id,
            Node::SpecialLine(n) => &mut n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Part(_) => NodeKind::Part,
            Node::Subpart(_) => NodeKind::Subpart,
            Node::DetailLine(_) => NodeKind::DetailLine,
            Node::SpecialLine(_) => NodeKind::SpecialLine,
        }
    }

    pub fn position(&self) -> f64 {
        match self {
            Node::Part(n) => n.position,
            Node::Subpart(n) => n.position,
            Node::DetailLine(n) => n.position,
            Node::SpecialLine(n) => n.position,
        }
    }

    pub fn set_position(&mut self, position: f64) {
        match self {
            Node::Part(n) => n.position = position,
            Node::Subpart(n) => n.position = position,
            Node::DetailLine(n) => n.position = position,
            Node::SpecialLine(n) => n.position = position,
        }
    }

    /// Insertion sequence number, the tie-breaker for equal positions.
    pub fn seq(&self) -> u64 {
        match self {
            Node::Part(n) => n.seq,
            Node::Subpart(n) => n.seq,
            Node::DetailLine(n) => n.seq,
            Node::SpecialLine(n) => n.seq,
        }
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        match self {
            Node::Part(n) => n.seq = seq,
            Node::Subpart(n) => n.seq = seq,
            Node::DetailLine(n) => n.seq = seq,
            Node::SpecialLine(n) => n.seq = seq,
        }
    }

    /// The scope this node lives in.
    pub fn parent(&self) -> Scope {
        match self {
            Node::Part(_) => Scope::Global,
            Node::Subpart(n) => Scope::Part(n.part.clone()),
            Node::DetailLine(n) => Scope::Subpart(n.subpart.clone()),
            Node::SpecialLine(n) => n.scope.clone(),
        }
    }

    /// Move the node under `scope`, rejecting scopes that cannot hold it.
    pub fn set_parent(&mut self, scope: Scope) -> Result<()> {
        let kind = self.kind();
        if !scope.accepts(kind) {
            return Err(EngineError::InvalidTarget(format!(
                "{kind} {} cannot be placed in {scope}",
                self.id()
            )));
        }
        match (self, scope) {
            (Node::Part(_), Scope::Global) => {}
            (Node::Subpart(n), Scope::Part(id)) => n.part = id,
            (Node::DetailLine(n), Scope::Subpart(id)) => n.subpart = id,
            (Node::SpecialLine(n), scope) => n.scope = scope,
            _ => {}
        }
        Ok(())
    }

    /// The scope this node opens for its children, if it is a container.
    pub fn as_scope(&self) -> Option<Scope> {
        match self {
            Node::Part(n) => Some(Scope::Part(n.id.clone())),
            Node::Subpart(n) => Some(Scope::Subpart(n.id.clone())),
            Node::DetailLine(_) | Node::SpecialLine(_) => None,
        }
    }

    /// Human-readable label (title, designation or special-line label).
    pub fn label(&self) -> &str {
        match self {
            Node::Part(n) => &n.title,
            Node::Subpart(n) => &n.title,
            Node::DetailLine(n) => &n.designation,
            Node::SpecialLine(n) => &n.label,
        }
    }

    /// Document order: position first, insertion sequence on ties.
    pub fn cmp_order(&self, other: &Node) -> Ordering {
        self.position()
            .total_cmp(&other.position())
            .then_with(|| self.seq().cmp(&other.seq()))
    }

    /// Rewrite every reference to `from` (own id, parent, base) as `to`.
    pub(crate) fn rename_references(&mut self, from: &NodeId, to: &NodeId) {
        fn swap_scope(scope: &mut Scope, from: &NodeId, to: &NodeId) {
            match scope {
                Scope::Part(id) | Scope::Subpart(id) if id == from => *id = to.clone(),
                _ => {}
            }
        }

        if self.id() == from {
            *self.id_mut() = to.clone();
        }
        match self {
            Node::Part(_) => {}
            Node::Subpart(n) => {
                if &n.part == from {
                    n.part = to.clone();
                }
            }
            Node::DetailLine(n) => {
                if &n.subpart == from {
                    n.subpart = to.clone();
                }
            }
            Node::SpecialLine(n) => {
                swap_scope(&mut n.scope, from, to);
                if let Some(base) = n.base_ref.as_mut() {
                    swap_scope(base, from, to);
                }
            }
        }
    }
}

impl From<Part> for Node {
    fn from(n: Part) -> Self {
        Node::Part(n)
    }
}

impl From<Subpart> for Node {
    fn from(n: Subpart) -> Self {
        Node::Subpart(n)
    }
}

impl From<DetailLine> for Node {
    fn from(n: DetailLine) -> Self {
        Node::DetailLine(n)
    }
}

impl From<SpecialLine> for Node {
    fn from(n: SpecialLine) -> Self {
        Node::SpecialLine(n)
    }
}
