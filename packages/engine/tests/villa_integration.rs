//! Integration tests on the villa demo quote.
//!
//! Loads `demos/villa.yaml` and checks tree numbering, totals, the
//! calculation trace and a two-month progress billing cycle.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use devis_engine::{
    build_situation_draft, compute_bases, evaluate, evaluate_traced, format_money, project,
    Avenant, AvenantLine, BillingConfig, Document, EngineError, InMemoryStore, LineKey, NodeId,
    Period, QuoteStore, SituationState, TotalsReport,
};
use pretty_assertions::assert_eq;
use std::path::Path;

const PROJECT: &str = "villa-dupont";

fn load_villa() -> Document {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let path = Path::new(manifest_dir)
        .parent()
        .and_then(|p| p.parent())
        .map(|p| p.join("demos").join("villa.yaml"))
        .expect("Could not find demos directory");
    Document::from_file(&path).expect("Failed to load villa quote")
}

fn money(v: f64) -> String {
    format_money(v)
}

#[test]
fn test_villa_numbering() {
    let doc = load_villa();
    let projection = project(&doc);
    assert!(projection.orphans.is_empty());

    let tree = projection.tree;
    let number = |id: i64| tree.display_number(&NodeId::from(id));
    assert_eq!(number(1).as_deref(), Some("1"));
    assert_eq!(number(112).as_deref(), Some("1.1.2"));
    assert_eq!(number(121).as_deref(), Some("1.2.1"));
    // Unnumbered header is skipped by the counter
    assert_eq!(number(2), None);
    assert_eq!(number(3).as_deref(), Some("2"));
    assert_eq!(number(311).as_deref(), Some("2.1.1"));
}

#[test]
fn test_villa_totals() {
    let tree = project(&load_villa()).tree;
    let bases = compute_bases(&tree);
    let totals = evaluate(&tree, &bases).unwrap();

    assert_eq!(money(bases.global_base()), "10420.00");
    assert_eq!(money(totals.subpart_total(&NodeId::from(11)).unwrap()), "4320.00");
    assert_eq!(money(totals.part_total(&NodeId::from(1)).unwrap()), "7500.00");
    assert_eq!(money(totals.part_total(&NodeId::from(3)).unwrap()), "2500.00");

    // 10 % of everything but itself: 7500 + 2500 - 500
    let frais = totals.special(&NodeId::from(901)).unwrap();
    assert_eq!(money(frais.amount), "950.00");
    let sous_total = totals.special(&NodeId::from(902)).unwrap();
    assert_eq!(money(sous_total.running_total), "10950.00");

    assert_eq!(money(totals.global), "10450.00");
    assert!(totals.warnings.is_empty());
}

#[test]
fn test_villa_totals_report_is_stable() {
    let tree = project(&load_villa()).tree;
    let totals = evaluate(&tree, &compute_bases(&tree)).unwrap();
    let report = TotalsReport::from_totals(&totals).with_numbers(tree.numbering());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["global"], "10450.00");
    assert_eq!(json["parts"]["1"], "7500.00");
    assert_eq!(json["specials"]["903"]["amount"], "500.00");
    assert_eq!(json["numbers"]["311"], "2.1.1");

    let again = TotalsReport::from_totals(&evaluate(&tree, &compute_bases(&tree)).unwrap())
        .with_numbers(tree.numbering());
    assert_eq!(serde_json::to_string(&report).unwrap(), serde_json::to_string(&again).unwrap());
}

#[test]
fn test_villa_trace() {
    let tree = project(&load_villa()).tree;
    let (totals, trace) = evaluate_traced(&tree, &compute_bases(&tree)).unwrap();

    assert_eq!(trace.amount, Some(totals.global));
    let rendered = trace.render();
    assert!(rendered.starts_with("global"), "{rendered}");
    assert!(rendered.contains("part:1"));
    assert!(rendered.contains("Frais de chantier"));
    assert!(rendered.contains("10% of global"));
    assert!(trace.find("Remise gros oeuvre").is_some());
}

#[test]
fn test_villa_yaml_round_trip() {
    let doc = load_villa();
    let yaml = doc.to_yaml_string().unwrap();
    let reloaded = Document::from_yaml_str(&yaml).unwrap();
    assert_eq!(project(&reloaded).tree, project(&doc).tree);
}

#[test]
fn test_villa_billing_cycle() {
    let billing = BillingConfig::default();
    let mut store = InMemoryStore::new().with_document(PROJECT, load_villa());

    // February: everything half done
    let mut february = build_situation_draft(&store, PROJECT, 2, 2026, &billing).unwrap();
    assert_eq!(february.state, SituationState::NoPriorSituation);
    february.set_all_current_pct(50.0);
    let b = february.breakdown();
    assert_eq!(money(b.cumulative_ht), "5225.00");
    assert_eq!(money(b.monthly_ht), "5225.00");
    assert_eq!(money(b.total_marche_ht), "10450.00");
    store.save_situation(&february.to_record()).unwrap();

    // March: finished
    let mut march = build_situation_draft(&store, PROJECT, 3, 2026, &billing).unwrap();
    assert_eq!(march.state, SituationState::DraftFromPrevious);
    assert_eq!(march.number, 2);
    let terrassement = LineKey::Detail {
        id: NodeId::from(111),
    };
    assert_eq!(march.line(&terrassement).unwrap().previous_pct, 50.0);

    march.set_all_current_pct(100.0);
    let b = march.breakdown();
    assert_eq!(money(b.prior_cumulative_ht), "5225.00");
    assert_eq!(money(b.monthly_ht), "5225.00");
    assert_eq!(money(b.retenue_garantie), "261.25");
    assert_eq!(money(b.net_ht), "4963.75");
    assert_eq!(money(b.tva), "992.75");
    assert_eq!(money(b.ttc), "5956.50");
    assert_eq!(money(b.remaining_ht), "0.00");
    assert_eq!(money(b.completion_pct), "100.00");
    store.save_situation(&march.to_record()).unwrap();

    // February is superseded
    let err = store.save_situation(&february.to_record()).unwrap_err();
    assert!(matches!(err, EngineError::SituationLocked(_)));

    assert_eq!(
        store.list_situations(PROJECT).unwrap(),
        vec![Period::new(2, 2026).unwrap(), Period::new(3, 2026).unwrap()]
    );
}

#[test]
fn test_villa_avenant_extends_the_market() {
    let billing = BillingConfig::default();
    let mut store = InMemoryStore::new().with_document(PROJECT, load_villa());
    store
        .insert_avenant(
            PROJECT,
            Avenant::new(50, 1, "Terrasse")
                .with_line(AvenantLine::new(501, "Dalle terrasse", 10.0, 30.0))
                .with_line(AvenantLine::new(502, "Cloison supprimée", 1.0, 100.0).reduction()),
        )
        .unwrap();

    let mut situation = build_situation_draft(&store, PROJECT, 4, 2026, &billing).unwrap();
    assert_eq!(money(situation.total_marche_ht), "10650.00");

    let dalle = LineKey::Avenant {
        avenant: NodeId::from(50),
        line: NodeId::from(501),
    };
    situation.set_current_pct(&dalle, 100.0).unwrap();
    assert_eq!(money(situation.breakdown().cumulative_ht), "300.00");
}
