//! Command-line interface for `devis`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use console::style;
use devis_engine::wire::{changed_positions, order_payload, structure_fingerprint};
use devis_engine::{
    build_situation_draft, compute_bases, evaluate, evaluate_traced, project, reorder,
    BillingConfig, Document, InMemoryStore, LineKey, NodeId, Period, QuoteStore, Scope,
    Situation, SituationRecord, TargetPosition, TotalsReport,
};

use crate::error::{CliError, Result};
use crate::render::{render_situation, render_totals, render_warnings};

/// Project name used when the document does not carry one.
const DEFAULT_PROJECT: &str = "devis";

/// Devis - Inspect construction quotes and draft progress invoices.
#[derive(Parser)]
#[command(name = "devis")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the numbered outline of a quote.
    Tree {
        /// Quote document (YAML or JSON)
        file: PathBuf,
    },

    /// Compute scope totals and special line amounts.
    Totals {
        /// Quote document (YAML or JSON)
        file: PathBuf,

        /// Print the calculation trace
        #[arg(long)]
        trace: bool,

        /// Print the totals as JSON (amounts as 2-decimal strings)
        #[arg(long)]
        json: bool,
    },

    /// Draft the progress invoice of a month.
    Situation(SituationArgs),

    /// Move a node and print the positions that changed.
    Move(MoveArgs),

    /// Print the ordering payload and the structure fingerprint.
    Order {
        /// Quote document (YAML or JSON)
        file: PathBuf,
    },
}

#[derive(Args)]
pub struct SituationArgs {
    /// Quote document (YAML or JSON)
    pub file: PathBuf,

    /// Month of the situation, 1-12 (default: current month)
    #[arg(short, long)]
    pub month: Option<u32>,

    /// Year of the situation (default: current year)
    #[arg(short, long)]
    pub year: Option<i32>,

    /// Saved situation of the previous month (JSON written by --output)
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Progress of every line, in percent
    #[arg(long)]
    pub all: Option<f64>,

    /// Progress of one line, as <line id>=<percent>; repeatable
    #[arg(long = "progress", value_name = "ID=PCT")]
    pub progress: Vec<String>,

    /// Compte prorata rate in percent (default: DEVIS_TAUX_PRORATA or 0)
    #[arg(long)]
    pub prorata: Option<f64>,

    /// Retenue CIE amount
    #[arg(long)]
    pub cie: Option<f64>,

    /// Print the breakdown as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the situation record to this file, for use as --previous next month
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct MoveArgs {
    /// Quote document (YAML or JSON)
    pub file: PathBuf,

    /// Node to move, with its subtree
    pub node: String,

    #[command(flatten)]
    pub target: MoveTarget,

    /// Write the reordered document back to the file
    #[arg(long)]
    pub write: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct MoveTarget {
    /// Place directly after this node
    #[arg(long)]
    pub after: Option<String>,

    /// Place as first child of this scope (global, part:<id>, subpart:<id>)
    #[arg(long)]
    pub first_of: Option<String>,

    /// Place as last child of this scope
    #[arg(long)]
    pub last_of: Option<String>,
}

impl MoveTarget {
    fn resolve(&self) -> Result<TargetPosition> {
        if let Some(anchor) = &self.after {
            return Ok(TargetPosition::After(anchor.parse()?));
        }
        if let Some(scope) = &self.first_of {
            return Ok(TargetPosition::FirstChildOf(scope.parse()?));
        }
        match &self.last_of {
            Some(scope) => Ok(TargetPosition::LastChildOf(scope.parse::<Scope>()?)),
            None => Ok(TargetPosition::End),
        }
    }
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tree { file } => tree_command(&file),
        Commands::Totals { file, trace, json } => totals_command(&file, trace, json),
        Commands::Situation(args) => situation_command(&args),
        Commands::Move(args) => move_command(&args),
        Commands::Order { file } => order_command(&file),
    }
}

fn load(file: &Path) -> Result<Document> {
    Ok(Document::from_file(file)?)
}

/// Execute the tree command.
fn tree_command(file: &Path) -> Result<()> {
    let doc = load(file)?;
    let projection = project(&doc);

    print!("{}", projection.tree.render());
    if !projection.orphans.is_empty() {
        let warnings: Vec<String> = projection
            .orphans
            .iter()
            .map(|o| o.to_error().to_string())
            .collect();
        eprint!("{}", render_warnings(&warnings));
    }
    Ok(())
}

/// Execute the totals command.
fn totals_command(file: &Path, trace: bool, json: bool) -> Result<()> {
    let doc = load(file)?;
    let tree = project(&doc).tree;
    let bases = compute_bases(&tree);

    let (totals, trace) = if trace {
        let (totals, trace) = evaluate_traced(&tree, &bases)?;
        (totals, Some(trace))
    } else {
        (evaluate(&tree, &bases)?, None)
    };

    if json {
        let report = TotalsReport::from_totals(&totals).with_numbers(tree.numbering());
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_totals(&tree, &totals));
        eprint!("{}", render_warnings(&totals.warnings));
    }
    if let Some(trace) = trace {
        println!();
        println!("{}", trace.render());
    }
    Ok(())
}

/// Execute the situation command.
fn situation_command(args: &SituationArgs) -> Result<()> {
    let doc = load(&args.file)?;
    let project_name = doc.project().unwrap_or(DEFAULT_PROJECT).to_string();

    let today = Period::from_date(chrono::Local::now().date_naive());
    let period = Period::new(
        args.month.unwrap_or(today.month),
        args.year.unwrap_or(today.year),
    )?;

    let mut billing = BillingConfig::from_env()?;
    if let Some(rate) = args.prorata {
        billing = billing.with_taux_prorata(rate);
    }

    let mut store = InMemoryStore::new().with_document(project_name.clone(), doc);
    if let Some(path) = &args.previous {
        let mut previous: SituationRecord = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let found = Period::new(previous.month, previous.year)?;
        if found != period.previous() {
            return Err(CliError::PreviousPeriod {
                expected: period.previous().to_string(),
                found: found.to_string(),
            });
        }
        previous.project = project_name.clone();
        store.save_situation(&previous)?;
    }

    let mut situation =
        build_situation_draft(&store, &project_name, period.month, period.year, &billing)?;
    apply_progress(&mut situation, args)?;
    if let Some(cie) = args.cie {
        situation.set_retenue_cie(cie);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&situation.breakdown())?);
    } else {
        print!("{}", render_situation(&situation));
        let regressions = situation.regressions();
        if !regressions.is_empty() {
            let warnings: Vec<String> = regressions
                .iter()
                .map(|l| format!("progress of {} went down", l.key))
                .collect();
            eprint!("{}", render_warnings(&warnings));
        }
    }

    if let Some(output) = &args.output {
        std::fs::write(output, serde_json::to_string_pretty(&situation.to_record())?)?;
        eprintln!(
            "{} {}",
            style("Saved to:").green().bold(),
            output.display()
        );
    }
    Ok(())
}

fn apply_progress(situation: &mut Situation, args: &SituationArgs) -> Result<()> {
    if let Some(pct) = args.all {
        situation.set_all_current_pct(pct);
    }

    let keys: HashMap<NodeId, LineKey> = situation
        .lines
        .iter()
        .filter_map(|l| match &l.key {
            LineKey::Detail { id } | LineKey::Special { id } => Some((id.clone(), l.key.clone())),
            LineKey::Avenant { .. } => None,
        })
        .collect();

    for raw in &args.progress {
        let (id, pct) = parse_progress(raw)?;
        let key = keys
            .get(&id)
            .ok_or_else(|| CliError::UnknownLine(id.to_string()))?;
        situation.set_current_pct(key, pct)?;
    }
    Ok(())
}

/// Parse `<line id>=<percent>`.
pub fn parse_progress(raw: &str) -> Result<(NodeId, f64)> {
    let invalid = || CliError::InvalidProgress(raw.to_string());
    let (id, pct) = raw.split_once('=').ok_or_else(invalid)?;
    let id: NodeId = id.parse().map_err(|_| invalid())?;
    let pct: f64 = pct.trim().parse().map_err(|_| invalid())?;
    if !pct.is_finite() {
        return Err(invalid());
    }
    Ok((id, pct))
}

/// Execute the move command.
fn move_command(args: &MoveArgs) -> Result<()> {
    let doc = load(&args.file)?;
    let node: NodeId = args.node.parse()?;
    let target = args.target.resolve()?;

    let placement = reorder(&doc, &node, &target)?;
    if let Some(scope) = &placement.renumbered {
        eprintln!(
            "{} {}",
            style("Renumbered").yellow().bold(),
            scope
        );
    }

    let changed = changed_positions(&doc, &placement.document);
    println!("{}", serde_json::to_string_pretty(&changed)?);

    if args.write {
        let content = match args.file.extension().and_then(|e| e.to_str()) {
            Some("json") => placement.document.to_json_string()?,
            _ => placement.document.to_yaml_string()?,
        };
        std::fs::write(&args.file, content)?;
    }
    Ok(())
}

/// Execute the order command.
fn order_command(file: &Path) -> Result<()> {
    let doc = load(file)?;
    let payload = serde_json::json!({
        "fingerprint": structure_fingerprint(&doc),
        "order": order_payload(&doc),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_totals() {
        let cli = Cli::parse_from(["devis", "totals", "quote.yaml", "--trace"]);
        let Commands::Totals { file, trace, json } = cli.command else {
            panic!("expected totals");
        };
        assert_eq!(file, PathBuf::from("quote.yaml"));
        assert!(trace);
        assert!(!json);
    }

    #[test]
    fn test_cli_parse_situation() {
        let cli = Cli::parse_from([
            "devis",
            "situation",
            "quote.yaml",
            "--month",
            "3",
            "--year",
            "2026",
            "--progress",
            "111=40",
            "--progress",
            "112=100",
        ]);
        let Commands::Situation(args) = cli.command else {
            panic!("expected situation");
        };
        assert_eq!(args.month, Some(3));
        assert_eq!(args.year, Some(2026));
        assert_eq!(args.progress, vec!["111=40", "112=100"]);
    }

    #[test]
    fn test_cli_move_needs_one_target() {
        assert!(Cli::try_parse_from(["devis", "move", "q.yaml", "3"]).is_err());
        assert!(Cli::try_parse_from([
            "devis", "move", "q.yaml", "3", "--after", "1", "--last-of", "global"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["devis", "move", "q.yaml", "3", "--first-of", "global"])
            .unwrap();
        let Commands::Move(args) = cli.command else {
            panic!("expected move");
        };
        assert_eq!(
            args.target.resolve().unwrap(),
            TargetPosition::FirstChildOf(Scope::Global)
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("111=40").unwrap(), (NodeId::from(111), 40.0));
        assert_eq!(parse_progress("12 = 12.5").unwrap(), (NodeId::from(12), 12.5));
        assert!(matches!(
            parse_progress("111"),
            Err(CliError::InvalidProgress(_))
        ));
        assert!(parse_progress("x=1").is_err());
        assert!(parse_progress("1=NaN").is_err());
    }
}
