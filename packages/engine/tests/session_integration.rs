//! Integration tests for an editing session on the villa demo quote.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use devis_engine::{
    format_money, BillingConfig, CatalogItem, DevisSession, Document, EngineError, InMemoryStore,
    LineKey, NodeId, NodeKind, QuoteStore, Scope, TargetPosition,
};
use std::path::Path;

const PROJECT: &str = "villa-dupont";

fn open_villa() -> DevisSession<InMemoryStore> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let path = Path::new(manifest_dir)
        .parent()
        .and_then(|p| p.parent())
        .map(|p| p.join("demos").join("villa.yaml"))
        .expect("Could not find demos directory");
    let doc = Document::from_file(&path).expect("Failed to load villa quote");

    let mut store = InMemoryStore::new().with_document(PROJECT, doc);
    store.add_catalog_item(CatalogItem::new("LOT-PEINT", NodeKind::Part, "Peinture"));
    store.add_catalog_item(CatalogItem::new("PEINT-INT", NodeKind::Subpart, "Intérieurs"));
    store.add_catalog_item(
        CatalogItem::new("PEINT-M2", NodeKind::DetailLine, "Peinture murs").priced("m2", 12.0),
    );
    DevisSession::open(store, PROJECT, BillingConfig::default()).unwrap()
}

#[test]
fn test_catalog_lot_is_numbered_costed_and_saved() {
    let mut s = open_villa();
    assert_eq!(format_money(s.totals().global), "10450.00");

    let part = s.add_from_catalog("lot-peint", &TargetPosition::End).unwrap();
    let sub = s
        .add_from_catalog("PEINT-INT", &TargetPosition::LastChildOf(Scope::Part(part.clone())))
        .unwrap();
    let line = s
        .add_from_catalog("PEINT-M2", &TargetPosition::LastChildOf(Scope::Subpart(sub.clone())))
        .unwrap();

    assert!(part.is_temporary() && sub.is_temporary() && line.is_temporary());
    assert_eq!(s.tree().display_number(&line).as_deref(), Some("3.1.1"));
    // 10012 + 10 % of (10012 - 500) - 500
    assert_eq!(format_money(s.totals().global), "10463.20");
    assert!(s.is_dirty());

    s.save().unwrap();
    assert!(!s.is_dirty());
    for id in [904, 905, 906] {
        assert!(s.document().contains(&NodeId::from(id)), "missing {id}");
    }
    assert_eq!(
        s.tree().display_number(&NodeId::from(906)).as_deref(),
        Some("3.1.1")
    );

    let stored = s.store().fetch_document(PROJECT).unwrap();
    assert_eq!(stored.revision, s.revision());
    assert_eq!(stored.document.get(&NodeId::from(906)).unwrap().parent(), Scope::Subpart(NodeId::from(905)));
}

#[test]
fn test_situation_sees_saved_lines_only() {
    let mut s = open_villa();
    let part = s.add_from_catalog("LOT-PEINT", &TargetPosition::End).unwrap();

    // Not saved yet: the stored quote has no such part
    let draft = s.build_situation_draft(5, 2026).unwrap();
    assert_eq!(format_money(draft.total_marche_ht), "10450.00");

    let sub = s
        .add_from_catalog("PEINT-INT", &TargetPosition::LastChildOf(Scope::Part(part)))
        .unwrap();
    s.add_from_catalog("PEINT-M2", &TargetPosition::LastChildOf(Scope::Subpart(sub)))
        .unwrap();
    s.save().unwrap();

    let mut draft = s.build_situation_draft(5, 2026).unwrap();
    let peinture = LineKey::Detail {
        id: NodeId::from(906),
    };
    draft.set_current_pct(&peinture, 100.0).unwrap();
    assert_eq!(format_money(draft.breakdown().monthly_ht), "12.00");

    s.save_situation(&draft).unwrap();
    let saved = s.build_situation_draft(5, 2026).unwrap();
    assert_eq!(saved.line(&peinture).unwrap().current_pct, 100.0);
}

#[test]
fn test_concurrent_reorder_is_resubmitted() {
    let mut s = open_villa();
    s.reorder(&NodeId::from(3), &TargetPosition::FirstChildOf(Scope::Global))
        .unwrap();
    assert_eq!(s.tree().display_number(&NodeId::from(3)).as_deref(), Some("1"));

    // Another client writes in between
    s.store_mut().touch(PROJECT).unwrap();
    let err = s.save_order().unwrap_err();
    assert!(matches!(err, EngineError::PersistenceConflict { .. }));

    let remote = s.remote().unwrap();
    assert!(remote.get(&NodeId::from(3)).unwrap().position() > 1.0);
    assert!(s.document().get(&NodeId::from(3)).unwrap().position() < 1.0);

    s.save_order().unwrap();
    assert!(s.remote().is_none());
    let stored = s.store().fetch_document(PROJECT).unwrap();
    assert_eq!(
        stored.document.preorder()[0].id(),
        &NodeId::from(3),
        "stored order should start with the moved part"
    );
}
