//! When step definitions
//!
//! Steps that perform edits and computations.

use cucumber::when;
use devis_engine::{
    build_situation_draft, insert_at, parse_money, reorder, AdjustmentKind, DetailLine, NodeId,
    TargetPosition,
};

use crate::helpers::table::scope;
use crate::world::{detail_key, DevisWorld};

fn new_line(id: i64, label: &str) -> DetailLine {
    // The parent is overwritten by the insertion target
    DetailLine::new(id, 0, label, 1.0, 0.0)
}

// =============================================================================
// Ordering
// =============================================================================

#[when(regex = r#"^I insert line (\d+) "([^"]*)" as last child of "([^"]*)"$"#)]
fn insert_last_child(world: &mut DevisWorld, id: i64, label: String, target: String) {
    let target = TargetPosition::LastChildOf(scope(&target));
    let placement = insert_at(&world.document, new_line(id, &label).into(), &target)
        .expect("Insertion should succeed");
    world.commit(placement.document);
}

#[when(regex = r#"^I insert line (\d+) "([^"]*)" after node (\d+)$"#)]
fn insert_after(world: &mut DevisWorld, id: i64, label: String, anchor: i64) {
    let target = TargetPosition::After(NodeId::from(anchor));
    let placement = insert_at(&world.document, new_line(id, &label).into(), &target)
        .expect("Insertion should succeed");
    world.commit(placement.document);
}

#[when(regex = r#"^I move node (\d+) to (first|last) child of "([^"]*)"$"#)]
fn move_node(world: &mut DevisWorld, id: i64, which: String, target: String) {
    let target_scope = scope(&target);
    let target = if which == "first" {
        TargetPosition::FirstChildOf(target_scope)
    } else {
        TargetPosition::LastChildOf(target_scope)
    };
    let placement =
        reorder(&world.document, &NodeId::from(id), &target).expect("Move should succeed");
    world.commit(placement.document);
}

#[when(regex = r"^I insert (\d+) lines one after another after node (\d+)$")]
fn insert_many(world: &mut DevisWorld, count: usize, anchor: i64) {
    let before = world.document.clone();
    let mut anchor = NodeId::from(anchor);
    world.inserted.clear();

    for i in 0..count {
        let id = 10_000 + i as i64;
        let target = TargetPosition::After(anchor);
        let placement = insert_at(
            &world.document,
            new_line(id, &format!("Ligne {i}")).into(),
            &target,
        )
        .unwrap_or_else(|e| panic!("Insertion {i} failed: {e}"));
        world.document = placement.document;
        anchor = placement.node_id;
        world.inserted.push(anchor.clone());
    }
    world.before = Some(before);
}

// =============================================================================
// Calculation
// =============================================================================

#[when("the quote is evaluated")]
fn evaluate_quote(world: &mut DevisWorld) {
    world.evaluate();
}

// =============================================================================
// Situations
// =============================================================================

#[when(regex = r"^I draft the situation for (\d+)/(\d+)$")]
fn draft_situation(world: &mut DevisWorld, month: u32, year: i32) {
    match build_situation_draft(&world.store, &world.project, month, year, &world.billing) {
        Ok(situation) => {
            world.situation = Some(situation);
            world.error = None;
        }
        Err(e) => {
            world.situation = None;
            world.error = Some(e);
        }
    }
}

#[when(regex = r"^I set line (\d+) to (-?\d+(?:\.\d+)?) percent$")]
fn set_line_progress(world: &mut DevisWorld, line: i64, pct: f64) {
    world
        .situation_mut()
        .set_current_pct(&detail_key(line), pct)
        .expect("Line should be billable");
}

#[when(regex = r#"^the retenue CIE is "([^"]*)"$"#)]
fn set_retenue_cie(world: &mut DevisWorld, amount: String) {
    let amount = parse_money(&amount).expect("Amount should parse");
    world.situation_mut().set_retenue_cie(amount);
}

#[when(regex = r#"^a (deduction|addition) "([^"]*)" of "([^"]*)" is added$"#)]
fn add_adjustment(world: &mut DevisWorld, kind: String, label: String, amount: String) {
    let kind = if kind == "deduction" {
        AdjustmentKind::Deduction
    } else {
        AdjustmentKind::Addition
    };
    let amount = parse_money(&amount).expect("Amount should parse");
    world.situation_mut().add_adjustment(label, kind, amount);
}

