//! World struct for Cucumber BDD tests
//!
//! Contains the test state that persists across steps in a scenario.

use cucumber::World;
use devis_engine::{
    compute_bases, evaluate, project, BillingConfig, Bases, Document, EngineError, InMemoryStore,
    LineKey, Node, NodeId, Situation, Totals, Tree,
};

/// Project name used when a scenario does not store the quote explicitly.
pub const DEFAULT_PROJECT: &str = "scenario";

/// Test world that holds state across steps in a Cucumber scenario.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct DevisWorld {
    /// Nodes given so far, in table order
    pub nodes: Vec<Node>,
    /// Current quote
    pub document: Document,
    /// Quote before the last edit
    pub before: Option<Document>,
    /// Ids inserted by the last bulk insertion, in insertion order
    pub inserted: Vec<NodeId>,
    /// Persistence used by situation scenarios
    pub store: InMemoryStore,
    pub project: String,
    pub billing: BillingConfig,
    pub bases: Option<Bases>,
    pub totals: Option<Totals>,
    pub situation: Option<Situation>,
    /// Last error (if an operation failed)
    pub error: Option<EngineError>,
}

impl DevisWorld {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            document: Document::new(DEFAULT_PROJECT),
            before: None,
            inserted: Vec::new(),
            store: InMemoryStore::new(),
            project: DEFAULT_PROJECT.to_string(),
            billing: BillingConfig::default(),
            bases: None,
            totals: None,
            situation: None,
            error: None,
        }
    }

    /// Rebuild the document from the given nodes.
    pub fn rebuild(&mut self) {
        self.document = Document::from_nodes(Some(self.project.clone()), self.nodes.clone())
            .expect("Given nodes should form a valid document");
    }

    /// Replace the document, keeping the previous one for comparison.
    pub fn commit(&mut self, document: Document) {
        self.before = Some(std::mem::replace(&mut self.document, document));
    }

    pub fn tree(&self) -> Tree {
        project(&self.document).tree
    }

    pub fn evaluate(&mut self) {
        let tree = self.tree();
        let bases = compute_bases(&tree);
        match evaluate(&tree, &bases) {
            Ok(totals) => {
                self.totals = Some(totals);
                self.error = None;
            }
            Err(e) => {
                self.totals = None;
                self.error = Some(e);
            }
        }
        self.bases = Some(bases);
    }

    pub fn totals(&self) -> &Totals {
        match (&self.totals, &self.error) {
            (Some(totals), _) => totals,
            (None, Some(e)) => panic!("Evaluation failed: {e}"),
            (None, None) => panic!("The quote was not evaluated"),
        }
    }

    pub fn situation(&self) -> &Situation {
        match (&self.situation, &self.error) {
            (Some(situation), _) => situation,
            (None, Some(e)) => panic!("Drafting the situation failed: {e}"),
            (None, None) => panic!("No situation was drafted"),
        }
    }

    pub fn situation_mut(&mut self) -> &mut Situation {
        self.situation.as_mut().expect("No situation was drafted")
    }

    pub fn position_of(&self, id: &NodeId) -> f64 {
        self.document
            .get(id)
            .map(Node::position)
            .unwrap_or_else(|| panic!("Node {id} not in document"))
    }

    /// Ids in document order.
    pub fn order(&self) -> Vec<String> {
        self.document
            .preorder()
            .iter()
            .map(|n| n.id().to_string())
            .collect()
    }
}

pub fn detail_key(id: i64) -> LineKey {
    LineKey::Detail {
        id: NodeId::from(id),
    }
}
