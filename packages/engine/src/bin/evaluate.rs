//! CLI binary for evaluating a quote document via stdin.
//!
//! Usage:
//!   echo '{"document": {"nodes": [...]}}' | cargo run --bin evaluate
//!
//! Input (JSON on stdin):
//!   - document: Object: the quote document (`project`, `nodes`)
//!   - situation: Optional<Object>: progress billing request:
//!       - month, year: the billing period
//!       - progress: Object: line id → current percentage
//!       - previous: Optional<SituationRecord>: saved situation of the previous month
//!       - taux_prorata, retenue_cie: Optional<Number>
//!   - trace: Optional<bool>: include the calculation trace
//!
//! Output (JSON on stdout):
//!   - totals: Object: scope totals and special line amounts (2-decimal strings)
//!   - situation: Optional<Object>: situation breakdown (2-decimal strings)
//!   - trace: Optional<String>: rendered calculation trace
//!   - error: Optional<String>: error message if evaluation failed

use devis_engine::{
    build_situation_draft, compute_bases, evaluate, evaluate_traced, project, BillingConfig,
    Document, InMemoryStore, LineKey, NodeId, Period, QuoteStore, SituationBreakdown,
    SituationRecord, TotalsReport,
};
use std::collections::HashMap;
use std::io::Read;

const PROJECT: &str = "stdin";

#[derive(serde::Deserialize)]
struct EvaluateRequest {
    document: serde_json::Value,
    #[serde(default)]
    situation: Option<SituationRequest>,
    #[serde(default)]
    trace: bool,
}

#[derive(serde::Deserialize)]
struct SituationRequest {
    month: u32,
    year: i32,
    #[serde(default)]
    progress: HashMap<String, f64>,
    #[serde(default)]
    previous: Option<SituationRecord>,
    #[serde(default)]
    taux_prorata: Option<f64>,
    #[serde(default)]
    retenue_cie: Option<f64>,
}

#[derive(serde::Serialize)]
struct EvaluateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<TotalsReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    situation: Option<SituationBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn error_response(msg: String) -> EvaluateResponse {
    EvaluateResponse {
        totals: None,
        situation: None,
        trace: None,
        error: Some(msg),
    }
}

fn fail(msg: String) -> ! {
    let resp = error_response(msg);
    println!("{}", serde_json::to_string(&resp).unwrap_or_default());
    std::process::exit(1);
}

fn situation_breakdown(
    document: Document,
    request: SituationRequest,
) -> devis_engine::Result<SituationBreakdown> {
    let mut billing = BillingConfig::from_env()?;
    if let Some(taux) = request.taux_prorata {
        billing = billing.with_taux_prorata(taux);
    }

    let mut store = InMemoryStore::new().with_document(PROJECT, document);
    if let Some(mut previous) = request.previous {
        let period = Period::new(request.month, request.year)?.previous();
        previous.project = PROJECT.to_string();
        previous.month = period.month;
        previous.year = period.year;
        store.save_situation(&previous)?;
    }

    let mut situation = build_situation_draft(&store, PROJECT, request.month, request.year, &billing)?;
    for (id, pct) in &request.progress {
        let id: NodeId = id.parse()?;
        let key = situation
            .lines
            .iter()
            .map(|l| l.key.clone())
            .find(|k| matches!(k, LineKey::Detail { id: d } | LineKey::Special { id: d } if d == &id))
            .ok_or_else(|| devis_engine::EngineError::NodeNotFound(id.to_string()))?;
        situation.set_current_pct(&key, *pct)?;
    }
    if let Some(cie) = request.retenue_cie {
        situation.set_retenue_cie(cie);
    }
    Ok(situation.breakdown())
}

fn main() {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        fail(format!("Failed to read stdin: {e}"));
    }

    let request: EvaluateRequest = match serde_json::from_str(&input) {
        Ok(r) => r,
        Err(e) => fail(format!("Failed to parse request JSON: {e}")),
    };

    let document = match Document::from_json_value(request.document) {
        Ok(d) => d,
        Err(e) => fail(format!("Failed to load document: {e}")),
    };

    let projection = project(&document);
    let bases = compute_bases(&projection.tree);
    let evaluated = if request.trace {
        evaluate_traced(&projection.tree, &bases).map(|(t, trace)| (t, Some(trace.render())))
    } else {
        evaluate(&projection.tree, &bases).map(|t| (t, None))
    };
    let (totals, trace) = match evaluated {
        Ok(result) => result,
        Err(e) => fail(format!("{e}")),
    };

    let situation = match request.situation {
        Some(req) => match situation_breakdown(document, req) {
            Ok(b) => Some(b),
            Err(e) => fail(format!("{e}")),
        },
        None => None,
    };

    let resp = EvaluateResponse {
        totals: Some(TotalsReport::from_totals(&totals).with_numbers(projection.tree.numbering())),
        situation,
        trace,
        error: None,
    };
    println!("{}", serde_json::to_string(&resp).unwrap_or_default());
}
