//! Conversion of Gherkin tables into quote nodes
//!
//! Tables have a header row; empty cells mean "not set".

use cucumber::gherkin::Table;
use devis_engine::{
    DetailLine, Node, NodeId, Part, Scope, SpecialKind, SpecialLine, Subpart, ValueType,
};
use std::collections::HashMap;

/// Rows of a table keyed by header.
pub fn rows(table: &Table) -> Vec<HashMap<String, String>> {
    let mut iter = table.rows.iter();
    let Some(header) = iter.next() else {
        return Vec::new();
    };
    iter.map(|row| {
        header
            .iter()
            .zip(row)
            .filter(|(_, cell)| !cell.trim().is_empty())
            .map(|(h, cell)| (h.trim().to_string(), cell.trim().to_string()))
            .collect()
    })
    .collect()
}

fn cell<'a>(row: &'a HashMap<String, String>, name: &str) -> &'a str {
    row.get(name)
        .map(String::as_str)
        .unwrap_or_else(|| panic!("Missing column '{name}' in row {row:?}"))
}

fn number(row: &HashMap<String, String>, name: &str) -> f64 {
    let raw = cell(row, name);
    raw.parse()
        .unwrap_or_else(|_| panic!("Column '{name}' is not a number: '{raw}'"))
}

pub fn node_id(raw: &str) -> NodeId {
    raw.parse()
        .unwrap_or_else(|e| panic!("Invalid node id '{raw}': {e}"))
}

pub fn scope(raw: &str) -> Scope {
    raw.parse()
        .unwrap_or_else(|e| panic!("Invalid scope '{raw}': {e}"))
}

/// A Part, Subpart or detail line from a `type | id | parent | label |
/// position | quantity | unit_price` row.
pub fn node_from_row(row: &HashMap<String, String>) -> Node {
    let id = node_id(cell(row, "id"));
    let label = row.get("label").cloned().unwrap_or_default();
    let position = number(row, "position");

    match cell(row, "type") {
        "part" => Part::new(id, label).at(position).into(),
        "subpart" => Subpart::new(id, node_id(cell(row, "parent")), label)
            .at(position)
            .into(),
        "line" => DetailLine::new(
            id,
            node_id(cell(row, "parent")),
            label,
            number(row, "quantity"),
            number(row, "unit_price"),
        )
        .at(position)
        .into(),
        other => panic!("Unknown node type '{other}'"),
    }
}

/// A special line from an `id | scope | kind | value_type | value |
/// base_ref | position` row.
pub fn special_from_row(row: &HashMap<String, String>) -> Node {
    let kind = match cell(row, "kind") {
        "addition" => SpecialKind::Addition,
        "reduction" => SpecialKind::Reduction,
        "display" => SpecialKind::Display,
        other => panic!("Unknown special kind '{other}'"),
    };
    let mut line = SpecialLine::fixed(
        node_id(cell(row, "id")),
        scope(cell(row, "scope")),
        kind,
        number(row, "value"),
    )
    .at(number(row, "position"));

    if cell(row, "value_type") == "percentage" {
        line.value_type = ValueType::Percentage;
        line.base_ref = row.get("base_ref").map(|s| scope(s));
    }
    line.into()
}
