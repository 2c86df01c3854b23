//! Cognitive Engine data model (§3: IntelligenceMetrics, PatternRecord; §4.8 loops).

use serde::{Deserialize, Serialize};

/// Published once per reflection cycle; readers get an immutable snapshot (wait-free).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceMetrics {
    pub learning_rate: f64,
    pub pattern_count: usize,
    pub adaptation_score: f64,
    pub efficiency_index: f64,
    pub emergent_capability_count: u32,
    pub updated_ts: i64,
}

impl Default for IntelligenceMetrics {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            pattern_count: 0,
            adaptation_score: 0.0,
            efficiency_index: 0.0,
            emergent_capability_count: 0,
            updated_ts: 0,
        }
    }
}

impl IntelligenceMetrics {
    /// `emergent_capability_count` and any "consciousness indicator" are purely derived from
    /// metric thresholds (no stored semantics beyond this computation) per the resolved Open
    /// Question: thresholds chosen are adaptation_score and efficiency_index both crossing 0.7.
    pub fn recompute_emergent_capabilities(&mut self, pattern_confidences: &[f64]) {
        let mut count = 0;
        if self.adaptation_score >= 0.7 {
            count += 1;
        }
        if self.efficiency_index >= 0.7 {
            count += 1;
        }
        if pattern_confidences.iter().filter(|c| **c >= 0.7).count() >= 3 {
            count += 1;
        }
        self.emergent_capability_count = count;
    }

    pub fn clamp_learning_rate(&mut self) {
        self.learning_rate = self.learning_rate.clamp(0.01, 0.5);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Frequency,
    Sequence,
    Anomaly,
    Trend,
}

/// A detected pattern; evicted when stale (LRU or confidence decay), owned exclusively by the
/// Cognitive Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub kind: PatternKind,
    pub signature: String,
    pub confidence: f64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub evidence_count: u64,
}
