//! Community review data model (§3: ReviewPanel, ReviewOutcome; §4.7 aggregation rules).

use super::Severity;
use serde::{Deserialize, Serialize};

/// A topic-specific panel of persona reviewers assembled for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPanel {
    pub topic: String,
    pub reviewers: Vec<String>,
    pub quorum: usize,
    pub consensus_threshold: f64,
}

impl ReviewPanel {
    pub fn validate(&self) -> Result<(), String> {
        if self.reviewers.len() < self.quorum {
            return Err(format!(
                "panel has {} reviewers, quorum requires {}",
                self.reviewers.len(),
                self.quorum
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) || self.consensus_threshold <= 0.0 {
            return Err("consensus_threshold must be in (0,1]".to_string());
        }
        Ok(())
    }
}

/// Severity-ish label attached to a single reviewer's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl Label {
    pub fn severity(&self) -> Severity {
        match self {
            Label::Minimal => Severity::Minimal,
            Label::Low => Severity::Low,
            Label::Medium => Severity::Medium,
            Label::High => Severity::High,
            Label::Critical => Severity::Critical,
        }
    }
}

/// One reviewer's opinion on an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerResponse {
    pub reviewer: String,
    pub score: f64,
    pub label: Label,
    pub rationale: String,
}

/// Deterministic consensus classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consensus {
    Agree,
    Split,
    Timeout,
}

/// The produced-once-per-panel result of a community review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub panel_topic: String,
    pub responses: Vec<ReviewerResponse>,
    pub aggregate_score: f64,
    pub consensus: Consensus,
    pub decision: String,
}

impl ReviewOutcome {
    /// Score bucket used as a policy table key component (§4.9): "low" [0,0.5), "medium" [0.5,0.8),
    /// "high" [0.8,1.0].
    pub fn score_bucket(&self) -> &'static str {
        if self.aggregate_score >= 0.8 {
            "high"
        } else if self.aggregate_score >= 0.5 {
            "medium"
        } else {
            "low"
        }
    }

    /// Highest-severity label among responses, used for the tie-break rule.
    pub fn dominant_label(&self) -> Option<Label> {
        self.responses.iter().map(|r| r.label).max_by_key(|l| l.severity())
    }
}
