//! Plain-text rendering of trees, totals and situations.
//!
//! Amounts are printed with two decimals, the way they are stored.

use console::style;
use devis_engine::{
    format_money, line_amount, Situation, SituationBreakdown, SpecialLine, Totals, Tree,
};

const NUMBER_WIDTH: usize = 8;
const LABEL_WIDTH: usize = 40;
const AMOUNT_WIDTH: usize = 12;

fn row(out: &mut String, indent: usize, number: &str, label: &str, amount: Option<f64>) {
    let label = format!("{}{}", "  ".repeat(indent), label);
    let amount = amount.map(format_money).unwrap_or_default();
    out.push_str(&format!(
        "{number:<NUMBER_WIDTH$} {label:<LABEL_WIDTH$} {amount:>AMOUNT_WIDTH$}\n"
    ));
}

fn special_row(out: &mut String, indent: usize, line: &SpecialLine, totals: &Totals) {
    let label = if line.label.is_empty() {
        line.id.to_string()
    } else {
        line.label.clone()
    };
    let amount = totals.special(&line.id).map(|s| match line.kind {
        devis_engine::SpecialKind::Display => s.running_total,
        _ => s.signed(),
    });
    row(out, indent, "*", &label, amount);
}

/// Numbered outline with line amounts and scope totals.
pub fn render_totals(tree: &Tree, totals: &Totals) -> String {
    let mut out = String::new();
    for part in &tree.parts {
        row(
            &mut out,
            0,
            part.display_number.as_deref().unwrap_or(""),
            &part.part.title,
            totals.part_total(&part.part.id),
        );
        for sub in &part.subparts {
            row(
                &mut out,
                1,
                sub.display_number.as_deref().unwrap_or(""),
                &sub.subpart.title,
                totals.subpart_total(&sub.subpart.id),
            );
            for view in &sub.lines {
                row(
                    &mut out,
                    2,
                    view.display_number.as_deref().unwrap_or(""),
                    &view.line.designation,
                    Some(line_amount(&view.line)),
                );
            }
            for special in &sub.specials {
                special_row(&mut out, 2, special, totals);
            }
        }
        for special in &part.specials {
            special_row(&mut out, 1, special, totals);
        }
    }
    for special in &tree.specials {
        special_row(&mut out, 0, special, totals);
    }
    row(&mut out, 0, "", "Total HT", Some(totals.global));
    out
}

/// Per-line progress table followed by the amounts of the month.
pub fn render_situation(situation: &Situation) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Situation n°{} - {} ({})\n\n",
        situation.number,
        situation.period,
        state_label(situation)
    ));
    out.push_str(&format!(
        "{:<24} {:<LABEL_WIDTH$} {:>AMOUNT_WIDTH$} {:>7} {:>7} {:>AMOUNT_WIDTH$}\n",
        "Line", "Designation", "Amount HT", "Prev %", "Cur %", "Month HT"
    ));
    for line in &situation.lines {
        let flag = if line.regressed { " !" } else { "" };
        out.push_str(&format!(
            "{:<24} {:<LABEL_WIDTH$} {:>AMOUNT_WIDTH$} {:>7.2} {:>7.2} {:>AMOUNT_WIDTH$}{flag}\n",
            line.key.to_string(),
            line.designation,
            format_money(line.amount_ht),
            line.previous_pct,
            line.current_pct,
            format_money(line.period_ht()),
        ));
    }
    out.push('\n');
    out.push_str(&render_breakdown(&situation.breakdown()));
    out
}

fn state_label(situation: &Situation) -> &'static str {
    match situation.state {
        devis_engine::SituationState::NoPriorSituation => "first situation",
        devis_engine::SituationState::DraftFromPrevious => "draft from previous month",
        devis_engine::SituationState::Saved => "saved",
    }
}

/// Amounts of a situation, one per row.
pub fn render_breakdown(b: &SituationBreakdown) -> String {
    let rows = [
        ("Cumulative HT", b.cumulative_ht),
        ("Previously billed HT", b.prior_cumulative_ht),
        ("Month HT", b.monthly_ht),
        ("Retenue de garantie", -b.retenue_garantie),
        ("Compte prorata", -b.compte_prorata),
        ("Retenue CIE", -b.retenue_cie),
        ("Adjustments", b.adjustments_total),
        ("Net HT", b.net_ht),
        ("TVA", b.tva),
        ("Total TTC", b.ttc),
    ];
    let mut out = String::new();
    for (label, amount) in rows {
        out.push_str(&format!(
            "{label:<LABEL_WIDTH$} {:>AMOUNT_WIDTH$}\n",
            format_money(amount)
        ));
    }
    out.push_str(&format!(
        "{:<LABEL_WIDTH$} {:>AMOUNT_WIDTH$}\n",
        "Market total HT",
        format_money(b.total_marche_ht)
    ));
    out.push_str(&format!(
        "{:<LABEL_WIDTH$} {:>AMOUNT_WIDTH$}\n",
        "Completion %",
        format!("{:.2}", b.completion_pct)
    ));
    out
}

/// Warnings, one per line, highlighted when the terminal supports it.
pub fn render_warnings(warnings: &[String]) -> String {
    warnings
        .iter()
        .map(|w| format!("{} {w}\n", style("warning:").yellow().bold()))
        .collect()
}
