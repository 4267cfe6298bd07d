//! First-skip-wins content filtering.
//!
//! Rules are evaluated in configured order by a [`RuleEvaluator`]. The
//! first rule answering [`FilterAction::Skip`] decides the outcome; a rule
//! whose evaluation fails is treated as a forward (fail-open).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::providers::HttpError;

/// Rule name reported when filtering did not run.
pub const NO_RULE: &str = "none";

/// Rule name reported when every rule let the text through.
pub const ALL_RULES: &str = "all";

/// What to do with a unit of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterAction {
    /// Deliver to the sink.
    Forward,
    /// Drop and notify.
    Skip,
}

impl FilterAction {
    /// Upper-case label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Skip => "SKIP",
        }
    }
}

/// A named filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Short identifier shown in skip notices.
    pub name: String,
    /// Natural-language instruction for the evaluator.
    pub prompt: String,
}

/// Answer of a single rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDecision {
    /// Verdict for this rule.
    pub action: FilterAction,
    /// Short justification.
    pub reason: String,
}

/// Outcome of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    /// Final verdict.
    pub action: FilterAction,
    /// Justification from the deciding rule.
    pub reason: String,
    /// Name of the deciding rule, or a sentinel ([`NO_RULE`], [`ALL_RULES`]).
    pub rule: String,
}

impl FilterVerdict {
    fn forward(reason: &str, rule: &str) -> Self {
        Self {
            action: FilterAction::Forward,
            reason: reason.to_owned(),
            rule: rule.to_owned(),
        }
    }

    /// Whether the content should be dropped.
    pub fn is_skip(&self) -> bool {
        self.action == FilterAction::Skip
    }
}

/// Errors from a rule evaluator backend.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// Transport or status failure talking to the backend.
    #[error("rule evaluation request failed: {0}")]
    Http(#[from] HttpError),

    /// The backend answered with something that is not a decision.
    #[error("rule evaluation parse error: {0}")]
    Parse(String),
}

/// Backend that judges text against one rule.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// Evaluate `text` against the rule `rule_name` described by `rule_prompt`.
    async fn evaluate(
        &self,
        rule_name: &str,
        rule_prompt: &str,
        text: &str,
    ) -> Result<RuleDecision, FilterError>;
}

/// Ordered rule list bound to an evaluator.
#[derive(Clone)]
pub struct FilterPipeline {
    rules: Vec<FilterRule>,
    evaluator: Arc<dyn RuleEvaluator>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("rules", &self.rules.iter().map(|r| &r.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FilterPipeline {
    /// Create a pipeline evaluating `rules` in order.
    pub fn new(rules: Vec<FilterRule>, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        Self { rules, evaluator }
    }

    /// Run the rules over `text`.
    ///
    /// Empty text or an empty rule list forwards without calling the
    /// evaluator.
    pub async fn evaluate(&self, text: &str) -> FilterVerdict {
        if text.trim().is_empty() {
            return FilterVerdict::forward("No text to analyze", NO_RULE);
        }
        if self.rules.is_empty() {
            return FilterVerdict::forward("No filters configured", NO_RULE);
        }

        for rule in &self.rules {
            let decision = match self.evaluator.evaluate(&rule.name, &rule.prompt, text).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "filter rule failed, forwarding by default");
                    RuleDecision {
                        action: FilterAction::Forward,
                        reason: "Filter error".to_owned(),
                    }
                }
            };
            info!(
                rule = %rule.name,
                action = decision.action.as_str(),
                reason = %decision.reason,
                "filter rule evaluated"
            );
            if decision.action == FilterAction::Skip {
                return FilterVerdict {
                    action: FilterAction::Skip,
                    reason: decision.reason,
                    rule: rule.name.clone(),
                };
            }
        }

        FilterVerdict::forward("Passed all filters", ALL_RULES)
    }
}
