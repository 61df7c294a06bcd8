//! Given step definitions
//!
//! Steps that set up the initial state for scenarios.

use cucumber::{gherkin::Step, given};
use devis_engine::{build_situation_draft, format_money, QuoteStore};

use crate::helpers::table::{node_from_row, rows, special_from_row};
use crate::world::{detail_key, DevisWorld};

// =============================================================================
// Quote structure
// =============================================================================

#[given("a quote with the following nodes:")]
fn set_quote_nodes(world: &mut DevisWorld, step: &Step) {
    let table = step.table.as_ref().expect("Step needs a table");
    world.nodes = rows(table).iter().map(node_from_row).collect();
    world.rebuild();
}

#[given("the following nodes are added:")]
fn add_quote_nodes(world: &mut DevisWorld, step: &Step) {
    let table = step.table.as_ref().expect("Step needs a table");
    world.nodes.extend(rows(table).iter().map(node_from_row));
    world.rebuild();
}

#[given("the following special lines:")]
fn add_special_lines(world: &mut DevisWorld, step: &Step) {
    let table = step.table.as_ref().expect("Step needs a table");
    world.nodes.extend(rows(table).iter().map(special_from_row));
    world.rebuild();
}

#[given("an empty quote")]
fn empty_quote(world: &mut DevisWorld) {
    world.nodes.clear();
    world.rebuild();
}

// =============================================================================
// Persistence and billing
// =============================================================================

#[given(expr = "the quote is stored as project {string}")]
fn store_quote(world: &mut DevisWorld, project: String) {
    world.project = project;
    world.rebuild();
    world
        .store
        .insert_document(world.project.clone(), world.document.clone());
}

#[given(regex = r"^the compte prorata rate is (\d+(?:\.\d+)?) percent$")]
fn set_taux_prorata(world: &mut DevisWorld, rate: f64) {
    world.billing = world.billing.clone().with_taux_prorata(rate);
}

#[given(
    regex = r#"^a saved situation for (\d+)/(\d+) with line (\d+) at (\d+(?:\.\d+)?) percent and cumulative "([^"]*)"$"#
)]
fn saved_situation(
    world: &mut DevisWorld,
    month: u32,
    year: i32,
    line: i64,
    pct: f64,
    cumulative: String,
) {
    let mut situation =
        build_situation_draft(&world.store, &world.project, month, year, &world.billing)
            .expect("Situation should draft");
    situation
        .set_current_pct(&detail_key(line), pct)
        .expect("Line should be billable");

    let record = situation.to_record();
    assert_eq!(
        record.cumulative_ht, cumulative,
        "Saved situation cumulative should be {cumulative}, got {}",
        record.cumulative_ht
    );
    assert_eq!(format_money(situation.cumulative_ht()), cumulative);

    world
        .store
        .save_situation(&record)
        .expect("Situation should save");
}
