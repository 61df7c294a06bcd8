//! Calculation trace for audit of billed amounts
//!
//! Records how every total was reached: which raw base a scope started from,
//! which special lines were applied in what order, and what each percentage
//! was taken of. This is what gets shown when a client questions an invoice.
//!
//! # Example
//!
//! ```ignore
//! use devis_engine::trace::{TraceBuilder, TraceKind};
//!
//! let mut builder = TraceBuilder::new();
//! builder.push("part:1", TraceKind::Scope);
//! builder.push("Remise 5%", TraceKind::Special);
//! builder.set_amount(-50.0);
//! builder.pop();
//! builder.set_amount(950.0);
//! let trace = builder.build();
//! ```

use serde::Serialize;

/// What a trace step represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Total of a scope (global, part, subpart)
    Scope,
    /// Raw base before special lines
    Base,
    /// Addition or reduction special line
    Special,
    /// Display line (running total snapshot)
    Display,
    /// Percentage base lookup
    BaseRef,
    /// Deduction on a situation
    Deduction,
    /// Situation breakdown root
    Situation,
}

impl TraceKind {
    fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Scope => "scope",
            TraceKind::Base => "base",
            TraceKind::Special => "special",
            TraceKind::Display => "display",
            TraceKind::BaseRef => "base_ref",
            TraceKind::Deduction => "deduction",
            TraceKind::Situation => "situation",
        }
    }
}

/// A node in the calculation trace tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceNode {
    pub kind: TraceKind,

    /// Scope or line identifier (e.g. `part:3`, a special line label)
    pub name: String,

    /// Signed amount contributed or reached at this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    /// Free-form explanation (`10% of subpart:4`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    pub fn new(kind: TraceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            amount: None,
            detail: None,
            children: Vec::new(),
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_child(mut self, child: TraceNode) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first search for the first node named `name`.
    pub fn find(&self, name: &str) -> Option<&TraceNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Render the trace as a human-readable tree string.
    ///
    /// Produces output like:
    /// ```text
    /// global (scope) = 1000.00
    /// +-- part:1 (scope) = 1000.00
    /// |   `-- part:1 (base) = 1000.00
    /// `-- Remise (special) = -100.00 [fixed]
    /// ```
    pub fn render(&self) -> String {
        self.render_internal(true, true)
    }

    fn render_internal(&self, is_last: bool, is_top_level: bool) -> String {
        let mut lines = Vec::new();

        let prefix = if is_top_level {
            ""
        } else if is_last {
            "`-- "
        } else {
            "+-- "
        };
        let child_indent = if is_top_level {
            ""
        } else if is_last {
            "    "
        } else {
            "|   "
        };

        let mut line = format!("{}{} ({})", prefix, self.name, self.kind.as_str());
        if let Some(amount) = self.amount {
            line.push_str(&format!(" = {:.2}", amount));
        }
        if let Some(ref detail) = self.detail {
            line.push_str(&format!(" [{}]", detail));
        }
        lines.push(line);

        let child_count = self.children.len();
        for (i, child) in self.children.iter().enumerate() {
            let child_str = child.render_internal(i + 1 == child_count, false);
            for child_line in child_str.lines() {
                lines.push(format!("{}{}", child_indent, child_line));
            }
        }

        lines.join("\n")
    }

    /// Single-line summary, e.g. `special:Remise=-100.00`.
    pub fn render_compact(&self) -> String {
        let amount = self
            .amount
            .map(|a| format!("={:.2}", a))
            .unwrap_or_default();
        format!("{}:{}{}", self.kind.as_str(), self.name, amount)
    }
}

/// Builder for calculation traces using a stack.
///
/// Nodes are pushed when a step starts and popped when it finishes; the
/// popped node becomes a child of the one below it.
#[derive(Debug)]
pub struct TraceBuilder {
    stack: Vec<TraceNode>,
    enabled: bool,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            enabled: true,
        }
    }

    /// Builder that records nothing.
    pub fn disabled() -> Self {
        Self {
            stack: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&mut self, name: impl Into<String>, kind: TraceKind) {
        if !self.enabled {
            return;
        }
        self.stack.push(TraceNode::new(kind, name));
    }

    pub fn set_amount(&mut self, amount: f64) {
        if !self.enabled {
            return;
        }
        if let Some(current) = self.stack.last_mut() {
            current.amount = Some(amount);
        }
    }

    pub fn set_detail(&mut self, detail: impl Into<String>) {
        if !self.enabled {
            return;
        }
        if let Some(current) = self.stack.last_mut() {
            current.detail = Some(detail.into());
        }
    }

    /// Record a finished leaf under the current node.
    pub fn leaf(&mut self, node: TraceNode) {
        if !self.enabled {
            return;
        }
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.stack.push(node),
        }
    }

    /// Pop the current node, attaching it to its parent.
    ///
    /// Returns the popped node; when it was the root, that is the full trace.
    pub fn pop(&mut self) -> Option<TraceNode> {
        if !self.enabled {
            return None;
        }
        let completed = self.stack.pop()?;
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(completed.clone());
        }
        Some(completed)
    }

    /// Pop everything left and return the root.
    pub fn build(mut self) -> Option<TraceNode> {
        if !self.enabled {
            return None;
        }
        let mut result = None;
        while !self.stack.is_empty() {
            result = self.pop();
        }
        result
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
