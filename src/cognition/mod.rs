//! Cognitive Engine (§4.8): three cooperative loops (learning, pattern detection, reflection)
//! each the sole writer of its own state, publishing a wait-free `IntelligenceMetrics` snapshot.

use crate::config::CognitionConfig;
use crate::types::{IntelligenceMetrics, PatternKind, PatternRecord};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One observed outcome fed in from the Workflow Executor or Community Reviewer.
#[derive(Debug, Clone)]
pub struct Observation {
    pub signature: String,
    pub confidence: f64,
    pub ts: i64,
}

pub struct CognitiveEngine {
    config: CognitionConfig,
    window: Arc<RwLock<VecDeque<Observation>>>,
    patterns: Arc<RwLock<Vec<PatternRecord>>>,
    metrics: Arc<RwLock<IntelligenceMetrics>>,
    running: Arc<RwLock<bool>>,
}

impl CognitiveEngine {
    pub fn new(config: CognitionConfig) -> Self {
        Self {
            config,
            window: Arc::new(RwLock::new(VecDeque::new())),
            patterns: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(RwLock::new(IntelligenceMetrics::default())),
            running: Arc::new(RwLock::new(true)),
        }
    }

    pub async fn observe(&self, observation: Observation) {
        let mut window = self.window.write().await;
        window.push_back(observation);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    pub async fn snapshot(&self) -> IntelligenceMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn patterns(&self) -> Vec<PatternRecord> {
        self.patterns.read().await.clone()
    }

    /// Spawn the three cooperative loops. Each owns exclusive write access to a distinct piece
    /// of state; only the reflection loop writes the published `IntelligenceMetrics` snapshot.
    pub fn start(self: &Arc<Self>) {
        let learning = Arc::clone(self);
        tokio::spawn(async move { learning.learning_loop().await });

        let pattern = Arc::clone(self);
        tokio::spawn(async move { pattern.pattern_loop().await });

        let reflection = Arc::clone(self);
        tokio::spawn(async move { reflection.reflection_loop().await });
    }

    pub async fn shutdown(&self) {
        *self.running.write().await = false;
    }

    /// Adjusts `learning_rate` toward the recent observation confidence trend and updates
    /// `adaptation_score` as an EMA of success feedback with α=0.1 (§4.8), sole writer of both
    /// fields.
    async fn learning_loop(&self) {
        const ADAPTATION_ALPHA: f64 = 0.1;
        let period = std::time::Duration::from_secs(self.config.learning_period_seconds);
        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(period).await;

            let window = self.window.read().await;
            if window.is_empty() {
                continue;
            }
            let mean_confidence: f64 = window.iter().map(|o| o.confidence).sum::<f64>() / window.len() as f64;
            let latest_feedback = window.back().map(|o| o.confidence);
            drop(window);

            let mut metrics = self.metrics.write().await;
            metrics.learning_rate += (mean_confidence - 0.5) * 0.01;
            metrics.clamp_learning_rate();

            if let Some(feedback) = latest_feedback {
                metrics.adaptation_score = (1.0 - ADAPTATION_ALPHA) * metrics.adaptation_score + ADAPTATION_ALPHA * feedback;
            }
        }
    }

    /// Runs the four pattern detectors over the current window and replaces the pattern set.
    async fn pattern_loop(&self) {
        let period = std::time::Duration::from_secs(self.config.pattern_period_seconds);
        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(period).await;

            let window = self.window.read().await.clone();
            if window.is_empty() {
                continue;
            }
            let detected = detect_patterns(&window);
            *self.patterns.write().await = detected;
        }
    }

    /// Recomputes `IntelligenceMetrics` (pattern count/efficiency/emergent capability count) and
    /// publishes the snapshot readers poll via `snapshot()`. `adaptation_score` is owned by the
    /// learning loop and only read here.
    async fn reflection_loop(&self) {
        let period = std::time::Duration::from_secs(self.config.reflection_period_seconds);
        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(period).await;

            let patterns = self.patterns.read().await;
            let pattern_count = patterns.len();
            let confidences: Vec<f64> = patterns.iter().map(|p| p.confidence).collect();
            drop(patterns);

            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let mut metrics = self.metrics.write().await;
            metrics.pattern_count = pattern_count;
            metrics.efficiency_index = if confidences.is_empty() {
                0.0
            } else {
                confidences.iter().sum::<f64>() / confidences.len() as f64
            };
            metrics.recompute_emergent_capabilities(&confidences);
            metrics.updated_ts = now;
        }
    }
}

/// Frequency, sequence, anomaly and trend detection over the observation window. Grouped by
/// signature; a signature recurring 3+ times in the window is promoted to a frequency pattern,
/// an isolated low-confidence outlier to an anomaly, and a monotonic confidence run to a trend.
fn detect_patterns(window: &VecDeque<Observation>) -> Vec<PatternRecord> {
    use std::collections::HashMap;

    let mut by_signature: HashMap<&str, Vec<&Observation>> = HashMap::new();
    for obs in window {
        by_signature.entry(obs.signature.as_str()).or_default().push(obs);
    }

    let mut records = Vec::new();
    for (signature, observations) in by_signature {
        let first_seen = observations.iter().map(|o| o.ts).min().unwrap_or(0);
        let last_seen = observations.iter().map(|o| o.ts).max().unwrap_or(0);
        let mean_confidence = observations.iter().map(|o| o.confidence).sum::<f64>() / observations.len() as f64;

        if observations.len() >= 3 {
            records.push(PatternRecord {
                kind: PatternKind::Frequency,
                signature: signature.to_string(),
                confidence: mean_confidence,
                first_seen,
                last_seen,
                evidence_count: observations.len() as u64,
            });
        } else if mean_confidence < 0.2 {
            records.push(PatternRecord {
                kind: PatternKind::Anomaly,
                signature: signature.to_string(),
                confidence: 1.0 - mean_confidence,
                first_seen,
                last_seen,
                evidence_count: observations.len() as u64,
            });
        }

        if observations.len() >= 2 {
            let mut sorted = observations.clone();
            sorted.sort_by_key(|o| o.ts);
            let monotonic_up = sorted.windows(2).all(|w| w[1].confidence >= w[0].confidence);
            if monotonic_up {
                records.push(PatternRecord {
                    kind: PatternKind::Trend,
                    signature: signature.to_string(),
                    confidence: mean_confidence,
                    first_seen,
                    last_seen,
                    evidence_count: observations.len() as u64,
                });
            }
        }
    }

    if window.len() >= 2 {
        let sequence: Vec<&str> = window.iter().map(|o| o.signature.as_str()).collect();
        if sequence.windows(2).all(|w| w[0] != w[1]) {
            records.push(PatternRecord {
                kind: PatternKind::Sequence,
                signature: sequence.join("->"),
                confidence: 0.5,
                first_seen: window.front().map(|o| o.ts).unwrap_or(0),
                last_seen: window.back().map(|o| o.ts).unwrap_or(0),
                evidence_count: window.len() as u64,
            });
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(signature: &str, confidence: f64, ts: i64) -> Observation {
        Observation { signature: signature.to_string(), confidence, ts }
    }

    #[test]
    fn three_repeats_yield_a_frequency_pattern() {
        let window: VecDeque<Observation> = VecDeque::from(vec![
            obs("spam-link", 0.6, 0),
            obs("spam-link", 0.6, 1),
            obs("spam-link", 0.6, 2),
        ]);
        let patterns = detect_patterns(&window);
        assert!(patterns.iter().any(|p| p.kind == PatternKind::Frequency && p.evidence_count == 3));
    }

    #[test]
    fn rare_low_confidence_signature_is_anomaly() {
        let window: VecDeque<Observation> = VecDeque::from(vec![obs("weird-one", 0.05, 0)]);
        let patterns = detect_patterns(&window);
        assert!(patterns.iter().any(|p| p.kind == PatternKind::Anomaly));
    }

    #[tokio::test]
    async fn observe_respects_window_size_bound() {
        let mut config = CognitionConfig::default();
        config.window_size = 2;
        let engine = CognitiveEngine::new(config);
        engine.observe(obs("a", 0.5, 0)).await;
        engine.observe(obs("b", 0.5, 1)).await;
        engine.observe(obs("c", 0.5, 2)).await;
        assert_eq!(engine.window.read().await.len(), 2);
    }
}
