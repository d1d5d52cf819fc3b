use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Guilty,
    Innocent,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Guilty => "guilty",
            Verdict::Innocent => "innocent",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "guilty" => Ok(Verdict::Guilty),
            "innocent" => Ok(Verdict::Innocent),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

/// A case as published by the catalog source. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: i64,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    pub ground_truth: Verdict,
}

/// A stored vote. The verdict stays a raw string so rows written by other
/// tools can still be aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub username: String,
    pub case_id: i64,
    pub verdict: String,
    pub ts: DateTime<Utc>,
}

impl VoteRecord {
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyVoted,
}

/// Result of a student submitting a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseAggregate {
    pub case_id: i64,
    pub total_votes: usize,
    pub guilty_votes: usize,
    pub innocent_votes: usize,
    pub p_guilty: f64,
    pub prediction: Verdict,
    pub ground_truth: Option<Verdict>,
    /// `None` when the case has no ground truth in the catalog.
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_negative: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.false_negative + self.true_negative
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub threshold: f64,
    pub cases: Vec<CaseAggregate>,
    pub metrics: GlobalMetrics,
    pub confusion: ConfusionMatrix,
}
