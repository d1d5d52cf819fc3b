use std::collections::{BTreeMap, HashMap};

use crate::models::{
    Case, CaseAggregate, ConfusionMatrix, GlobalMetrics, MetricsSummary, Verdict, VoteRecord,
};

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Aggregates votes per case and scores the jury's predictions against the
/// catalog's ground truth. Pure: the same inputs always give the same output.
pub fn compute_metrics(votes: &[VoteRecord], catalog: &[Case], threshold: f64) -> MetricsSummary {
    let threshold = normalize_threshold(threshold);

    if votes.is_empty() {
        return MetricsSummary {
            threshold,
            cases: Vec::new(),
            metrics: GlobalMetrics::default(),
            confusion: ConfusionMatrix::default(),
        };
    }

    // (total, guilty, innocent); unrecognised verdicts only count toward total
    let mut groups: BTreeMap<i64, (usize, usize, usize)> = BTreeMap::new();
    for vote in votes {
        let entry = groups.entry(vote.case_id).or_insert((0, 0, 0));
        entry.0 += 1;
        match vote.verdict() {
            Some(Verdict::Guilty) => entry.1 += 1,
            Some(Verdict::Innocent) => entry.2 += 1,
            None => {}
        }
    }

    let ground_truth: HashMap<i64, Verdict> = catalog
        .iter()
        .map(|case| (case.id, case.ground_truth))
        .collect();

    let cases: Vec<CaseAggregate> = groups
        .into_iter()
        .map(|(case_id, (total_votes, guilty_votes, innocent_votes))| {
            let p_guilty = guilty_votes as f64 / total_votes as f64;
            let prediction = classify(p_guilty, threshold);
            let truth = ground_truth.get(&case_id).copied();
            CaseAggregate {
                case_id,
                total_votes,
                guilty_votes,
                innocent_votes,
                p_guilty,
                prediction,
                ground_truth: truth,
                correct: truth.map(|truth| truth == prediction),
            }
        })
        .collect();

    let confusion = confusion_matrix(&cases);
    let metrics = global_metrics(&confusion);

    MetricsSummary {
        threshold,
        cases,
        metrics,
        confusion,
    }
}

/// Guilty only when the proportion is strictly above the threshold.
pub fn classify(p_guilty: f64, threshold: f64) -> Verdict {
    if p_guilty > threshold {
        Verdict::Guilty
    } else {
        Verdict::Innocent
    }
}

pub fn normalize_threshold(threshold: f64) -> f64 {
    if threshold.is_nan() {
        DEFAULT_THRESHOLD
    } else {
        threshold.clamp(0.0, 1.0)
    }
}

/// Counts outcomes over the cases that have a ground truth.
pub fn confusion_matrix(cases: &[CaseAggregate]) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::default();

    for case in cases {
        match (case.ground_truth, case.prediction) {
            (Some(Verdict::Guilty), Verdict::Guilty) => matrix.true_positive += 1,
            (Some(Verdict::Innocent), Verdict::Guilty) => matrix.false_positive += 1,
            (Some(Verdict::Guilty), Verdict::Innocent) => matrix.false_negative += 1,
            (Some(Verdict::Innocent), Verdict::Innocent) => matrix.true_negative += 1,
            (None, _) => {}
        }
    }

    matrix
}

/// Undefined ratios (zero denominators) are reported as 0.
pub fn global_metrics(matrix: &ConfusionMatrix) -> GlobalMetrics {
    let tp = matrix.true_positive;
    let fp = matrix.false_positive;
    let fneg = matrix.false_negative;

    GlobalMetrics {
        accuracy: ratio(tp + matrix.true_negative, matrix.total()),
        precision: ratio(tp, tp + fp),
        recall: ratio(tp, tp + fneg),
        f1: ratio(2 * tp, 2 * tp + fp + fneg),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
