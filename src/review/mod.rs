//! Community Reviewer (§4.7): assembles a topic panel, fans reviewers out in parallel with a
//! per-panel timeout, and aggregates their scores into one `ReviewOutcome`.

use crate::config::ReviewConfig;
use crate::types::{AppError, AppResult, Consensus, EventEnvelope, Label, ReviewOutcome, ReviewPanel, ReviewerResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Seam for the actual reviewer personas/backends (LLM-backed, rule-backed, or a test double).
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, reviewer: &str, event: &EventEnvelope) -> AppResult<ReviewerResponse>;
}

/// Reviewer client for the out-of-scope persona/AIP service, addressed over HTTP per §4.7's
/// "reviewer transport" note. Each roster entry is a base URL; the client posts the event and
/// parses a `{score, label, rationale}` JSON body.
pub struct HttpReviewer {
    client: reqwest::Client,
}

impl Default for HttpReviewer {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[derive(serde::Serialize)]
struct ReviewRequest<'a> {
    topic: &'a str,
    vector: crate::types::Vector,
    payload: &'a crate::types::Value,
}

#[derive(serde::Deserialize)]
struct ReviewResponseBody {
    score: f64,
    label: Label,
    rationale: String,
}

#[async_trait]
impl Reviewer for HttpReviewer {
    /// `reviewer` is a roster base URL; retried up to 2x on transient transport errors per §7.
    async fn review(&self, reviewer: &str, event: &EventEnvelope) -> AppResult<ReviewerResponse> {
        let request = ReviewRequest {
            topic: &event.topic(),
            vector: event.vector,
            payload: &event.payload,
        };

        let mut last_err = None;
        for attempt in 0..3 {
            match self.client.post(reviewer).json(&request).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: ReviewResponseBody = resp
                        .json()
                        .await
                        .map_err(|e| AppError::InvalidRequest(format!("malformed reviewer response: {}", e)))?;
                    return Ok(ReviewerResponse {
                        reviewer: reviewer.to_string(),
                        score: body.score.clamp(0.0, 1.0),
                        label: body.label,
                        rationale: body.rationale,
                    });
                }
                Ok(resp) => {
                    last_err = Some(AppError::Timeout(format!("reviewer {} returned {}", reviewer, resp.status())));
                }
                Err(e) => {
                    last_err = Some(AppError::from(e));
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(50 * (attempt + 1) as u64)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Timeout(format!("reviewer {} unreachable", reviewer))))
    }
}

pub struct CommunityReviewer {
    config: ReviewConfig,
    reviewer: Arc<dyn Reviewer>,
    roster: Vec<String>,
}

impl CommunityReviewer {
    pub fn new(config: ReviewConfig, reviewer: Arc<dyn Reviewer>, roster: Vec<String>) -> Self {
        Self { config, reviewer, roster }
    }

    fn assemble_panel(&self, topic: &str) -> AppResult<ReviewPanel> {
        let panel = ReviewPanel {
            topic: topic.to_string(),
            reviewers: self.roster.iter().take(self.config.panel_size).cloned().collect(),
            quorum: self.config.quorum,
            consensus_threshold: self.config.consensus_threshold,
        };
        panel
            .validate()
            .map_err(AppError::InsufficientPanel)?;
        Ok(panel)
    }

    pub async fn review_event(&self, event: &EventEnvelope) -> AppResult<ReviewOutcome> {
        let topic = event.topic();
        let panel = self.assemble_panel(&topic)?;

        let timeout = std::time::Duration::from_secs(self.config.timeout_seconds);
        let deadline = tokio::time::Instant::now() + timeout;

        let mut handles = Vec::with_capacity(panel.reviewers.len());
        for reviewer_name in &panel.reviewers {
            let reviewer = Arc::clone(&self.reviewer);
            let reviewer_name = reviewer_name.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move { reviewer.review(&reviewer_name, &event).await }));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok(response))) => responses.push(response),
                Ok(Ok(Err(e))) => tracing::debug!("reviewer call failed: {}", e),
                Ok(Err(e)) => tracing::warn!("reviewer task panicked: {}", e),
                Err(_) => tracing::debug!("reviewer call timed out"),
            }
        }

        Ok(self.aggregate(&panel, &topic, responses))
    }

    /// Mean score, agree/split/timeout classification, tie-break by severity on a split.
    fn aggregate(&self, panel: &ReviewPanel, topic: &str, responses: Vec<ReviewerResponse>) -> ReviewOutcome {
        if responses.len() < panel.quorum {
            return ReviewOutcome {
                panel_topic: topic.to_string(),
                responses,
                aggregate_score: 0.0,
                consensus: Consensus::Timeout,
                decision: "insufficient responses before panel timeout".to_string(),
            };
        }

        let mean = responses.iter().map(|r| r.score).sum::<f64>() / responses.len() as f64;
        let variance = responses.iter().map(|r| (r.score - mean).powi(2)).sum::<f64>() / responses.len() as f64;
        let stddev = variance.sqrt();

        let consensus = if stddev < 0.2 && mean >= panel.consensus_threshold {
            Consensus::Agree
        } else {
            Consensus::Split
        };

        let decision = match consensus {
            Consensus::Agree => format!("panel agreed, mean score {:.2}", mean),
            Consensus::Split => {
                let dominant = responses.iter().map(|r| r.label).max_by_key(|l| l.severity());
                match dominant {
                    Some(label) => format!("panel split, tie-broken to {:?}", label),
                    None => "panel split with no responses to tie-break".to_string(),
                }
            }
            Consensus::Timeout => unreachable!(),
        };

        ReviewOutcome {
            panel_topic: topic.to_string(),
            responses,
            aggregate_score: mean,
            consensus,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector;

    struct FixedReviewer {
        score: f64,
        label: Label,
    }

    #[async_trait]
    impl Reviewer for FixedReviewer {
        async fn review(&self, reviewer: &str, _event: &EventEnvelope) -> AppResult<ReviewerResponse> {
            Ok(ReviewerResponse {
                reviewer: reviewer.to_string(),
                score: self.score,
                label: self.label,
                rationale: "fixed for test".to_string(),
            })
        }
    }

    fn event() -> EventEnvelope {
        EventEnvelope {
            vector: Vector::Sms,
            source_id: "sms-gw-1".into(),
            received_ts: 0,
            payload: crate::types::Value::Null,
            correlation_id: "corr-1".into(),
        }
    }

    fn reviewer(roster_size: usize, config: ReviewConfig, score: f64, label: Label) -> CommunityReviewer {
        let roster: Vec<String> = (0..roster_size).map(|i| format!("reviewer-{}", i)).collect();
        CommunityReviewer::new(config, Arc::new(FixedReviewer { score, label }), roster)
    }

    #[tokio::test]
    async fn panel_below_quorum_is_insufficient_panel_error() {
        let mut config = ReviewConfig::default();
        config.quorum = 5;
        let reviewer = reviewer(2, config, 0.9, Label::High);
        assert!(matches!(reviewer.review_event(&event()).await, Err(AppError::InsufficientPanel(_))));
    }

    #[tokio::test]
    async fn unanimous_high_scores_agree_above_threshold() {
        let config = ReviewConfig::default();
        let reviewer = reviewer(5, config, 0.95, Label::Critical);
        let outcome = reviewer.review_event(&event()).await.unwrap();
        assert_eq!(outcome.consensus, Consensus::Agree);
        assert_eq!(outcome.score_bucket(), "high");
    }
}
