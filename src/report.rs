use std::collections::HashMap;
use std::fmt::Write;

use crate::catalog::{CatalogSnapshot, NO_CASES_MESSAGE};
use crate::models::{Case, CaseAggregate, MetricsSummary, Verdict, VoteRecord};

pub fn correctness_label(aggregate: &CaseAggregate) -> &'static str {
    match aggregate.correct {
        Some(true) => "correct",
        Some(false) => "incorrect",
        None => "no ground truth",
    }
}

/// Writes the catalog failure notice. Returns true when nothing else should
/// be rendered.
fn write_unavailable(output: &mut String, snapshot: &CatalogSnapshot) -> bool {
    if !snapshot.is_unavailable() {
        return false;
    }
    let _ = writeln!(output, "{NO_CASES_MESSAGE}");
    if let Some(error) = &snapshot.error {
        let _ = writeln!(output, "{error}");
    }
    true
}

fn write_metrics(output: &mut String, summary: &MetricsSummary) {
    let metrics = &summary.metrics;
    let _ = writeln!(output, "## Global Metrics");
    let _ = writeln!(output, "- Accuracy: {:.2}", metrics.accuracy);
    let _ = writeln!(output, "- Precision: {:.2}", metrics.precision);
    let _ = writeln!(output, "- Recall: {:.2}", metrics.recall);
    let _ = writeln!(output, "- F1 score: {:.2}", metrics.f1);
    let _ = writeln!(output);

    let matrix = &summary.confusion;
    let _ = writeln!(output, "## Confusion Matrix");
    let _ = writeln!(output, "| truth \\ prediction | innocent | guilty |");
    let _ = writeln!(output, "|---|---|---|");
    let _ = writeln!(
        output,
        "| innocent | TN {} | FP {} |",
        matrix.true_negative, matrix.false_positive
    );
    let _ = writeln!(
        output,
        "| guilty | FN {} | TP {} |",
        matrix.false_negative, matrix.true_positive
    );
}

fn write_case(
    output: &mut String,
    aggregate: &CaseAggregate,
    case: Option<&Case>,
    own_vote: Option<Verdict>,
) {
    let _ = writeln!(
        output,
        "### Case #{} ({})",
        aggregate.case_id,
        correctness_label(aggregate)
    );

    match case {
        Some(case) => {
            let _ = writeln!(output, "- Description: {}", case.description);
            if let Some(image) = case.image.as_deref().filter(|image| !image.is_empty()) {
                let _ = writeln!(output, "- Image: {image}");
            }
            let _ = writeln!(output, "- Truth: {}", case.ground_truth.as_str().to_uppercase());
        }
        None => {
            let _ = writeln!(output, "- Not in the current case catalog");
        }
    }

    let _ = writeln!(
        output,
        "- Jury verdict: {} (p={:.2})",
        aggregate.prediction.as_str().to_uppercase(),
        aggregate.p_guilty
    );

    if let Some(vote) = own_vote {
        let agreement = match aggregate.ground_truth {
            Some(truth) if truth == vote => " (matches the truth)",
            Some(_) => " (does not match the truth)",
            None => "",
        };
        let _ = writeln!(
            output,
            "- Your vote: {}{agreement}",
            vote.as_str().to_uppercase()
        );
    }

    let _ = writeln!(
        output,
        "- Votes: {} total, {} guilty, {} innocent",
        aggregate.total_votes,
        aggregate.guilty_votes,
        aggregate.innocent_votes
    );
    let _ = writeln!(output);
}

/// Markdown report for the admin: global scores first, then every case with
/// votes, including cases missing from the catalog.
pub fn build_report(summary: &MetricsSummary, catalog: &CatalogSnapshot) -> String {
    let cases: HashMap<i64, &Case> = catalog.cases.iter().map(|case| (case.id, case)).collect();
    let mut output = String::new();

    let _ = writeln!(output, "# Jury Results");
    if write_unavailable(&mut output, catalog) {
        return output;
    }
    let _ = writeln!(
        output,
        "Guilty threshold {:.2} across {} voted cases",
        summary.threshold,
        summary.cases.len()
    );
    let _ = writeln!(output);

    if summary.cases.is_empty() {
        let _ = writeln!(output, "No votes recorded yet.");
        return output;
    }

    write_metrics(&mut output, summary);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Results by Case");
    for aggregate in &summary.cases {
        write_case(&mut output, aggregate, cases.get(&aggregate.case_id).copied(), None);
    }

    output
}

/// Results view for a student. Only catalog cases are listed, each with the
/// student's own vote when there is one.
pub fn build_student_results(
    summary: &MetricsSummary,
    catalog: &CatalogSnapshot,
    votes: &[VoteRecord],
    username: &str,
) -> String {
    let cases: HashMap<i64, &Case> = catalog.cases.iter().map(|case| (case.id, case)).collect();
    let own_votes: HashMap<i64, Verdict> = votes
        .iter()
        .filter(|vote| vote.username == username)
        .filter_map(|vote| vote.verdict().map(|verdict| (vote.case_id, verdict)))
        .collect();

    let mut output = String::new();
    let _ = writeln!(output, "# Jury Results");
    let _ = writeln!(output, "User: {username}");
    if write_unavailable(&mut output, catalog) {
        return output;
    }
    let _ = writeln!(output);

    if summary.cases.is_empty() {
        let _ = writeln!(output, "No votes recorded yet.");
        return output;
    }

    write_metrics(&mut output, summary);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Results by Case");
    for aggregate in &summary.cases {
        let Some(case) = cases.get(&aggregate.case_id).copied() else {
            continue;
        };
        write_case(
            &mut output,
            aggregate,
            Some(case),
            own_votes.get(&aggregate.case_id).copied(),
        );
    }

    output
}
