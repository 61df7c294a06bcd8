//! Then step definitions
//!
//! Steps that verify outcomes and assertions.

use cucumber::then;
use devis_engine::wire::changed_positions;
use devis_engine::{format_money, project, EngineError, NodeId, SituationState};

use super::id_list;
use crate::helpers::table::scope;
use crate::world::{detail_key, DevisWorld};

fn assert_money(what: &str, actual: f64, expected: &str) {
    assert_eq!(
        format_money(actual),
        expected,
        "Expected {what} to be {expected}, got {actual}"
    );
}

// =============================================================================
// Ordering
// =============================================================================

#[then(regex = r"^node (\d+) is at position (\d+(?:\.\d+)?)$")]
fn assert_position(world: &mut DevisWorld, id: i64, expected: f64) {
    let actual = world.position_of(&NodeId::from(id));
    assert!(
        (actual - expected).abs() < 1e-9,
        "Expected node {id} at position {expected}, got {actual}"
    );
}

#[then(regex = r#"^the document order is "([^"]*)"$"#)]
fn assert_order(world: &mut DevisWorld, expected: String) {
    assert_eq!(world.order(), id_list(&expected));
}

#[then(regex = r#"^the document order starts with "([^"]*)"$"#)]
fn assert_order_prefix(world: &mut DevisWorld, expected: String) {
    let expected = id_list(&expected);
    let order = world.order();
    assert_eq!(
        &order[..expected.len()],
        expected.as_slice(),
        "Document order {order:?} should start with {expected:?}"
    );
}

#[then(regex = r#"^node (\d+) has display number "([^"]*)"$"#)]
fn assert_display_number(world: &mut DevisWorld, id: i64, expected: String) {
    let actual = world.tree().display_number(&NodeId::from(id));
    assert_eq!(
        actual.as_deref(),
        Some(expected.as_str()),
        "Display number of node {id}"
    );
}

#[then("no other node changed position")]
fn assert_no_other_change(world: &mut DevisWorld) {
    let before = world.before.as_ref().expect("No edit was made");
    let moved: Vec<_> = changed_positions(before, &world.document)
        .into_iter()
        .filter(|entry| before.contains(&entry.id))
        .collect();
    assert!(moved.is_empty(), "Existing nodes moved: {moved:?}");
}

#[then(regex = r"^node (\d+) is between node (\d+) and node (\d+)$")]
fn assert_between(world: &mut DevisWorld, id: i64, lower: i64, upper: i64) {
    let position = world.position_of(&NodeId::from(id));
    let lower = world.position_of(&NodeId::from(lower));
    let upper = world.position_of(&NodeId::from(upper));
    assert!(
        lower < position && position < upper,
        "Expected {lower} < {position} < {upper}"
    );
}

#[then(regex = r#"^node (\d+) belongs to "([^"]*)"$"#)]
fn assert_parent(world: &mut DevisWorld, id: i64, expected: String) {
    let node = world
        .document
        .get(&NodeId::from(id))
        .unwrap_or_else(|| panic!("Node {id} not in document"));
    assert_eq!(node.parent(), scope(&expected));
}

#[then("the inserted lines are in insertion order")]
fn assert_insertion_order(world: &mut DevisWorld) {
    let positions: Vec<f64> = world
        .inserted
        .iter()
        .map(|id| world.position_of(id))
        .collect();
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "Inserted positions are not strictly increasing: {positions:?}"
    );

    let order = world.order();
    let rank = |id: &NodeId| order.iter().position(|o| *o == id.to_string());
    let ranks: Vec<_> = world.inserted.iter().map(rank).collect();
    assert!(ranks.windows(2).all(|pair| pair[0] < pair[1]));
}

#[then(regex = r"^node (\d+) comes after every inserted line$")]
fn assert_after_inserted(world: &mut DevisWorld, id: i64) {
    let position = world.position_of(&NodeId::from(id));
    for inserted in &world.inserted {
        assert!(
            world.position_of(inserted) < position,
            "Inserted line {inserted} is not before node {id}"
        );
    }
}

#[then("projecting the quote twice gives the same tree")]
fn assert_projection_stable(world: &mut DevisWorld) {
    assert_eq!(project(&world.document), project(&world.document));
}

#[then("flattening and projecting again gives the same tree")]
fn assert_projection_idempotent(world: &mut DevisWorld) {
    let tree = world.tree();
    let flat = tree.flatten().expect("Tree should flatten");
    assert_eq!(project(&flat).tree, tree);
}

// =============================================================================
// Calculation
// =============================================================================

#[then(regex = r#"^the total of "([^"]*)" is "([^"]*)"$"#)]
fn assert_scope_total(world: &mut DevisWorld, target: String, expected: String) {
    let total = world
        .totals()
        .scope_total(&scope(&target))
        .unwrap_or_else(|| panic!("No total for {target}"));
    assert_money(&format!("total of {target}"), total, &expected);
}

#[then(regex = r#"^the global total is "([^"]*)"$"#)]
fn assert_global_total(world: &mut DevisWorld, expected: String) {
    assert_money("global total", world.totals().global, &expected);
}

#[then(regex = r#"^special line (\d+) amounts to "([^"]*)"$"#)]
fn assert_special_amount(world: &mut DevisWorld, id: i64, expected: String) {
    let special = world
        .totals()
        .special(&NodeId::from(id))
        .unwrap_or_else(|| panic!("Special line {id} was not evaluated"));
    assert_money(&format!("special line {id}"), special.amount, &expected);
}

#[then(regex = r#"^display line (\d+) shows "([^"]*)"$"#)]
fn assert_display_line(world: &mut DevisWorld, id: i64, expected: String) {
    let special = world
        .totals()
        .special(&NodeId::from(id))
        .unwrap_or_else(|| panic!("Display line {id} was not evaluated"));
    assert_money(
        &format!("display line {id}"),
        special.running_total,
        &expected,
    );
}

#[then(regex = r#"^there is a warning containing "([^"]*)"$"#)]
fn assert_warning(world: &mut DevisWorld, needle: String) {
    let warnings = &world.totals().warnings;
    assert!(
        warnings.iter().any(|w| w.contains(&needle)),
        "No warning mentions '{needle}': {warnings:?}"
    );
}

#[then(regex = r#"^the raw base of "([^"]*)" is "([^"]*)"$"#)]
fn assert_raw_base(world: &mut DevisWorld, target: String, expected: String) {
    let bases = world.bases.as_ref().expect("The quote was not evaluated");
    let base = bases
        .scope_base(&scope(&target))
        .unwrap_or_else(|| panic!("No base for {target}"));
    assert_money(&format!("raw base of {target}"), base, &expected);
}

#[then("the global raw base equals the sum of line amounts")]
fn assert_bases_additive(world: &mut DevisWorld) {
    let bases = world.bases.as_ref().expect("The quote was not evaluated");
    let lines: f64 = bases.lines.values().sum();
    let parts: f64 = bases.parts.values().sum();
    assert!((bases.global_base() - lines).abs() < 1e-9);
    assert!((bases.global_base() - parts).abs() < 1e-9);
}

// =============================================================================
// Situations
// =============================================================================

#[then(regex = r#"^the situation state is "([^"]*)"$"#)]
fn assert_situation_state(world: &mut DevisWorld, expected: String) {
    let expected = match expected.as_str() {
        "no_prior_situation" => SituationState::NoPriorSituation,
        "draft_from_previous" => SituationState::DraftFromPrevious,
        "saved" => SituationState::Saved,
        other => panic!("Unknown situation state '{other}'"),
    };
    assert_eq!(world.situation().state, expected);
}

#[then(regex = r"^the situation number is (\d+)$")]
fn assert_situation_number(world: &mut DevisWorld, expected: u32) {
    assert_eq!(world.situation().number, expected);
}

#[then(regex = r"^line (\d+) is at (\d+(?:\.\d+)?) percent$")]
fn assert_line_progress(world: &mut DevisWorld, id: i64, expected: f64) {
    let line = world
        .situation()
        .line(&detail_key(id))
        .unwrap_or_else(|| panic!("Line {id} is not billable"));
    assert_eq!(line.current_pct, expected, "Progress of line {id}");
}

#[then(regex = r"^line (\d+) is flagged as regressed$")]
fn assert_line_regressed(world: &mut DevisWorld, id: i64) {
    let line = world
        .situation()
        .line(&detail_key(id))
        .unwrap_or_else(|| panic!("Line {id} is not billable"));
    assert!(line.regressed, "Line {id} should be flagged as regressed");
    assert_eq!(world.situation().regressions().len(), 1);
}

#[then(regex = r#"^the (monthly amount|retenue de garantie|compte prorata|net amount|TTC amount) is "([^"]*)"$"#)]
fn assert_breakdown(world: &mut DevisWorld, field: String, expected: String) {
    let b = world.situation().breakdown();
    let actual = match field.as_str() {
        "monthly amount" => b.monthly_ht,
        "retenue de garantie" => b.retenue_garantie,
        "compte prorata" => b.compte_prorata,
        "net amount" => b.net_ht,
        "TTC amount" => b.ttc,
        other => panic!("Unknown breakdown field '{other}'"),
    };
    assert_money(&field, actual, &expected);
}

#[then("the error is an invalid period")]
fn assert_invalid_period(world: &mut DevisWorld) {
    assert!(
        matches!(world.error, Some(EngineError::InvalidPeriod { .. })),
        "Expected an invalid period error, got {:?}",
        world.error
    );
}
