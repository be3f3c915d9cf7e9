use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use {
    serde::{Deserialize, Serialize},
    tokio::time::{Duration, Instant},
    tracing::{debug, warn},
};

use weft_protocol::frame::now_ms;

use crate::message::Message;

// ── Risk and actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Allow,
    Block,
    Modify,
    Escalate,
}

// ── Classifier seam ──────────────────────────────────────────────────────────

/// Result of classifying content against one rule.
#[derive(Debug, Clone)]
pub struct Classification {
    pub is_violation: bool,
    pub confidence: f64,
    pub rule_id: String,
}

/// Pluggable content classifier. Must be deterministic for a fixed
/// content + rule pair within a single fabric run.
pub trait Classifier: Send + Sync {
    fn classify(&self, content: &str) -> anyhow::Result<Classification>;
}

/// Default classifier: case-insensitive substring match over a keyword
/// list. A placeholder heuristic — the pipeline contract, not this
/// scoring, is what matters.
pub struct KeywordClassifier {
    rule_id: String,
    keywords: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(rule_id: &str, keywords: &[&str]) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, content: &str) -> anyhow::Result<Classification> {
        let lower = content.to_lowercase();
        let hit = self.keywords.iter().any(|k| lower.contains(k));
        Ok(Classification {
            is_violation: hit,
            confidence: if hit { 0.9 } else { 0.0 },
            rule_id: self.rule_id.clone(),
        })
    }
}

// ── Rules ────────────────────────────────────────────────────────────────────

/// One enabled safety rule: a classifier plus the risk/action it implies.
pub struct SafetyRule {
    pub id: String,
    pub description: String,
    pub risk: RiskLevel,
    pub action: FilterAction,
    pub enabled: bool,
    classifier: Arc<dyn Classifier>,
}

impl SafetyRule {
    pub fn new(
        id: &str,
        description: &str,
        risk: RiskLevel,
        action: FilterAction,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            risk,
            action,
            enabled: true,
            classifier,
        }
    }
}

// ── Verdicts and the violation log ───────────────────────────────────────────

/// Outcome of running a message through the pipeline.
///
/// `message` is the forwardable message (Allow/Modify, after output
/// shaping); `rejection` is the synthetic reply to the sender
/// (Block/Escalate).
#[derive(Debug, Clone)]
pub struct FilterVerdict {
    pub action: FilterAction,
    pub risk: RiskLevel,
    pub matched_rules: Vec<String>,
    pub message: Option<Message>,
    pub rejection: Option<Message>,
}

/// Entry in the bounded, append-only violation log.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationEntry {
    pub message_id: String,
    pub sender: String,
    pub rule_ids: Vec<String>,
    pub risk: RiskLevel,
    pub action: FilterAction,
    pub timestamp: u64,
}

/// A message held for external approval after an Escalate verdict.
/// Unresolved entries expire after the pipeline's approval TTL; an
/// expired escalation is treated as denied.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub id: String,
    pub message: Message,
    pub rule_ids: Vec<String>,
    pub risk: RiskLevel,
    pub created_at: Instant,
}

/// An audience/context-conditional output transformation. Pure
/// content → content; applied in ascending declared priority order after
/// the safety stage.
pub struct OutputTransform {
    pub name: String,
    pub priority: u8,
    apply: Box<dyn Fn(&str) -> String + Send + Sync>,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// The mandatory safety gate in front of the router.
///
/// Verdicts are computed fresh per message and never cached, so decisions
/// always reflect current rule state.
pub struct FilterPipeline {
    rules: Vec<SafetyRule>,
    transforms: Vec<OutputTransform>,
    denylist: Vec<String>,
    disclaimer: Option<String>,
    violations: Mutex<VecDeque<ViolationEntry>>,
    approvals: Mutex<Vec<PendingApproval>>,
    violation_cap: usize,
    approval_ttl: Duration,
}

/// How long an escalated message waits for a verdict before it lapses.
pub const DEFAULT_APPROVAL_TTL: Duration = Duration::from_secs(600);

impl FilterPipeline {
    pub fn new(violation_cap: usize) -> Self {
        Self {
            rules: Vec::new(),
            transforms: Vec::new(),
            denylist: Vec::new(),
            disclaimer: None,
            violations: Mutex::new(VecDeque::new()),
            approvals: Mutex::new(Vec::new()),
            violation_cap,
            approval_ttl: DEFAULT_APPROVAL_TTL,
        }
    }

    /// Baseline rule set used by the gateway when no custom pipeline is
    /// supplied.
    pub fn with_default_rules(violation_cap: usize) -> Self {
        Self::new(violation_cap)
            .rule(SafetyRule::new(
                "harmful-content",
                "destructive or harmful instructions",
                RiskLevel::Critical,
                FilterAction::Block,
                Arc::new(KeywordClassifier::new("harmful-content", &[
                    "harmful",
                    "destroy all",
                    "delete everything",
                ])),
            ))
            .rule(SafetyRule::new(
                "sensitive-data",
                "credentials or secrets in transit",
                RiskLevel::Medium,
                FilterAction::Modify,
                Arc::new(KeywordClassifier::new("sensitive-data", &[
                    "password", "api key", "secret",
                ])),
            ))
            .deny_terms(&["password", "api key", "secret"])
    }

    pub fn rule(mut self, rule: SafetyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Terms redacted from content on a Modify verdict.
    pub fn deny_terms(mut self, terms: &[&str]) -> Self {
        self.denylist
            .extend(terms.iter().map(|t| t.to_lowercase()));
        self
    }

    pub fn disclaimer(mut self, text: &str) -> Self {
        self.disclaimer = Some(text.to_string());
        self
    }

    /// Override how long escalations stay pending before lapsing.
    pub fn approval_ttl(mut self, ttl: Duration) -> Self {
        self.approval_ttl = ttl;
        self
    }

    /// Register an output-shaping transform. Transforms run for every
    /// forwarded message in ascending priority order.
    pub fn transform(
        mut self,
        name: &str,
        priority: u8,
        apply: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transforms.push(OutputTransform {
            name: name.to_string(),
            priority,
            apply: Box::new(apply),
        });
        self.transforms.sort_by_key(|t| t.priority);
        self
    }

    /// Run the safety stage then the output-shaping stage.
    ///
    /// Risk is the maximum across matched rules; on a tie the earliest
    /// declared max-risk rule supplies the action. A classifier error is
    /// fail-closed: Block at Critical, error text attached to the
    /// rejection metadata.
    pub fn admit(&self, message: &Message) -> FilterVerdict {
        let mut matched: Vec<(&SafetyRule, Classification)> = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            match rule.classifier.classify(&message.content) {
                Ok(c) if c.is_violation => matched.push((rule, c)),
                Ok(_) => {},
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "classifier fault, failing closed");
                    return self.fail_closed(message, &rule.id, &e.to_string());
                },
            }
        }

        let Some(max_risk) = matched.iter().map(|(r, _)| r.risk).max() else {
            // Nothing matched: allow, shape output.
            return FilterVerdict {
                action: FilterAction::Allow,
                risk: RiskLevel::None,
                matched_rules: Vec::new(),
                message: Some(self.shape(message)),
                rejection: None,
            };
        };

        let rule_ids: Vec<String> = matched.iter().map(|(r, _)| r.id.clone()).collect();
        // First rule at the max risk level decides the action.
        let action = matched
            .iter()
            .find(|(r, _)| r.risk == max_risk)
            .map(|(r, _)| r.action)
            .unwrap_or(FilterAction::Block);

        debug!(
            message = %message.id,
            risk = ?max_risk,
            ?action,
            rules = ?rule_ids,
            "safety rules matched"
        );

        match action {
            FilterAction::Allow => FilterVerdict {
                action,
                risk: max_risk,
                matched_rules: rule_ids,
                message: Some(self.shape(message)),
                rejection: None,
            },
            FilterAction::Modify => {
                let modified = message.with_content(self.redact(&message.content));
                FilterVerdict {
                    action,
                    risk: max_risk,
                    matched_rules: rule_ids,
                    message: Some(self.shape(&modified)),
                    rejection: None,
                }
            },
            FilterAction::Block => {
                self.log_violation(message, &rule_ids, max_risk, action);
                FilterVerdict {
                    action,
                    risk: max_risk,
                    matched_rules: rule_ids.clone(),
                    message: None,
                    rejection: Some(rejection_message(message, &rule_ids, "blocked", None)),
                }
            },
            FilterAction::Escalate => {
                self.log_violation(message, &rule_ids, max_risk, action);
                self.push_approval(message, &rule_ids, max_risk);
                FilterVerdict {
                    action,
                    risk: max_risk,
                    matched_rules: rule_ids.clone(),
                    message: None,
                    rejection: Some(rejection_message(
                        message,
                        &rule_ids,
                        "held for approval",
                        None,
                    )),
                }
            },
        }
    }

    fn fail_closed(&self, message: &Message, rule_id: &str, error: &str) -> FilterVerdict {
        let rule_ids = vec![rule_id.to_string()];
        self.log_violation(message, &rule_ids, RiskLevel::Critical, FilterAction::Block);
        FilterVerdict {
            action: FilterAction::Block,
            risk: RiskLevel::Critical,
            matched_rules: rule_ids.clone(),
            message: None,
            rejection: Some(rejection_message(message, &rule_ids, "blocked", Some(error))),
        }
    }

    /// Redact denylisted terms and append the disclaimer, if configured.
    fn redact(&self, content: &str) -> String {
        let mut out = content.to_string();
        for term in &self.denylist {
            let lower = out.to_lowercase();
            if lower.len() != out.len() {
                // Lowercasing shifted byte offsets; match case-sensitively.
                out = out.replace(term.as_str(), "[redacted]");
                continue;
            }
            let mut redacted = String::with_capacity(out.len());
            let mut cursor = 0;
            for (idx, _) in lower.match_indices(term.as_str()) {
                redacted.push_str(&out[cursor..idx]);
                redacted.push_str("[redacted]");
                cursor = idx + term.len();
            }
            redacted.push_str(&out[cursor..]);
            out = redacted;
        }
        if let Some(disclaimer) = &self.disclaimer {
            out.push('\n');
            out.push_str(disclaimer);
        }
        out
    }

    /// Output-shaping stage: apply registered transforms in priority order.
    fn shape(&self, message: &Message) -> Message {
        if self.transforms.is_empty() {
            return message.clone();
        }
        let mut content = message.content.clone();
        for t in &self.transforms {
            content = (t.apply)(&content);
        }
        message.with_content(content)
    }

    fn log_violation(
        &self,
        message: &Message,
        rule_ids: &[String],
        risk: RiskLevel,
        action: FilterAction,
    ) {
        let mut log = self
            .violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if log.len() >= self.violation_cap {
            log.pop_front();
        }
        log.push_back(ViolationEntry {
            message_id: message.id.to_string(),
            sender: message.sender.clone(),
            rule_ids: rule_ids.to_vec(),
            risk,
            action,
            timestamp: now_ms(),
        });
    }

    fn push_approval(&self, message: &Message, rule_ids: &[String], risk: RiskLevel) {
        let mut approvals = self
            .approvals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::drop_lapsed(&mut approvals, self.approval_ttl);
        approvals.push(PendingApproval {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.clone(),
            rule_ids: rule_ids.to_vec(),
            risk,
            created_at: Instant::now(),
        });
    }

    /// Pending escalations awaiting the external authority.
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        let mut approvals = self
            .approvals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::drop_lapsed(&mut approvals, self.approval_ttl);
        approvals.clone()
    }

    /// Record the authority's verdict on a pending escalation. Returns the
    /// held message when approved, for the caller to re-submit. The entry
    /// leaves the store either way; a lapsed entry can no longer be
    /// resolved.
    pub fn resolve_approval(&self, id: &str, approved: bool) -> Option<Message> {
        let mut approvals = self
            .approvals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::drop_lapsed(&mut approvals, self.approval_ttl);
        let idx = approvals.iter().position(|a| a.id == id)?;
        let entry = approvals.remove(idx);
        approved.then_some(entry.message)
    }

    fn drop_lapsed(approvals: &mut Vec<PendingApproval>, ttl: Duration) {
        approvals.retain(|a| {
            let live = a.created_at.elapsed() <= ttl;
            if !live {
                debug!(approval = %a.id, message = %a.message.id, "escalation lapsed");
            }
            live
        });
    }

    pub fn violations(&self) -> Vec<ViolationEntry> {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Synthetic reply returned to the sender for Block/Escalate verdicts.
fn rejection_message(
    original: &Message,
    rule_ids: &[String],
    reason: &str,
    classifier_error: Option<&str>,
) -> Message {
    let mut rejection = Message::new(
        "fabric",
        Some(&original.sender),
        &format!("message {reason}: rules [{}]", rule_ids.join(", ")),
    );
    rejection
        .metadata
        .insert("rejected_message_id".into(), original.id.to_string());
    rejection
        .metadata
        .insert("rule_ids".into(), rule_ids.join(","));
    if let Some(err) = classifier_error {
        rejection
            .metadata
            .insert("classifier_error".into(), err.to_string());
    }
    rejection
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct FaultyClassifier;

    impl Classifier for FaultyClassifier {
        fn classify(&self, _content: &str) -> anyhow::Result<Classification> {
            anyhow::bail!("model backend unreachable")
        }
    }

    fn block_rule(id: &str, keyword: &str, risk: RiskLevel) -> SafetyRule {
        SafetyRule::new(
            id,
            "test rule",
            risk,
            FilterAction::Block,
            Arc::new(KeywordClassifier::new(id, &[keyword])),
        )
    }

    #[test]
    fn clean_content_is_allowed_unchanged() {
        let pipeline = FilterPipeline::new(10).rule(block_rule("r1", "harmful", RiskLevel::High));
        let msg = Message::new("a", Some("b"), "good morning");
        let verdict = pipeline.admit(&msg);
        assert_eq!(verdict.action, FilterAction::Allow);
        assert_eq!(verdict.risk, RiskLevel::None);
        assert_eq!(verdict.message.unwrap().content, "good morning");
        assert!(pipeline.violations().is_empty());
    }

    #[test]
    fn block_produces_rejection_with_rule_ids() {
        let pipeline =
            FilterPipeline::new(10).rule(block_rule("harmful-content", "harmful", RiskLevel::Critical));
        let msg = Message::new("a", Some("b"), "harmful delete everything");
        let verdict = pipeline.admit(&msg);

        assert_eq!(verdict.action, FilterAction::Block);
        assert_eq!(verdict.risk, RiskLevel::Critical);
        assert!(verdict.message.is_none());

        let rejection = verdict.rejection.unwrap();
        assert_eq!(rejection.recipient.as_deref(), Some("a"));
        assert_eq!(
            rejection.metadata.get("rule_ids").map(String::as_str),
            Some("harmful-content")
        );
        assert_eq!(pipeline.violations().len(), 1);
    }

    #[tokio::test]
    async fn max_risk_wins_and_first_max_supplies_action() {
        let escalate = SafetyRule::new(
            "escalate-high",
            "",
            RiskLevel::High,
            FilterAction::Escalate,
            Arc::new(KeywordClassifier::new("escalate-high", &["launch"])),
        );
        let modify = SafetyRule::new(
            "modify-high",
            "",
            RiskLevel::High,
            FilterAction::Modify,
            Arc::new(KeywordClassifier::new("modify-high", &["launch"])),
        );
        let low = block_rule("block-low", "launch", RiskLevel::Low);

        // Declaration order: escalate-high first, so it wins the High tie.
        let pipeline = FilterPipeline::new(10).rule(escalate).rule(modify).rule(low);
        let verdict = pipeline.admit(&Message::new("a", Some("b"), "launch it"));
        assert_eq!(verdict.action, FilterAction::Escalate);
        assert_eq!(verdict.risk, RiskLevel::High);
        assert_eq!(verdict.matched_rules.len(), 3);
        assert_eq!(pipeline.pending_approvals().len(), 1);
    }

    #[test]
    fn modify_redacts_denylist_and_appends_disclaimer() {
        let rule = SafetyRule::new(
            "sensitive",
            "",
            RiskLevel::Medium,
            FilterAction::Modify,
            Arc::new(KeywordClassifier::new("sensitive", &["password"])),
        );
        let pipeline = FilterPipeline::new(10)
            .rule(rule)
            .deny_terms(&["password"])
            .disclaimer("-- redacted by fabric policy");

        let verdict = pipeline.admit(&Message::new("a", Some("b"), "my Password is hunter2"));
        assert_eq!(verdict.action, FilterAction::Modify);
        let forwarded = verdict.message.unwrap();
        assert!(forwarded.content.starts_with("my [redacted] is hunter2"));
        assert!(forwarded.content.ends_with("-- redacted by fabric policy"));
    }

    #[test]
    fn classifier_fault_fails_closed() {
        let rule = SafetyRule::new(
            "flaky",
            "",
            RiskLevel::Low,
            FilterAction::Allow,
            Arc::new(FaultyClassifier),
        );
        let pipeline = FilterPipeline::new(10).rule(rule);
        let verdict = pipeline.admit(&Message::new("a", Some("b"), "anything"));

        assert_eq!(verdict.action, FilterAction::Block);
        assert_eq!(verdict.risk, RiskLevel::Critical);
        let rejection = verdict.rejection.unwrap();
        assert!(
            rejection
                .metadata
                .get("classifier_error")
                .unwrap()
                .contains("unreachable")
        );
        assert_eq!(pipeline.violations().len(), 1);
    }

    #[test]
    fn violation_log_is_bounded() {
        let pipeline = FilterPipeline::new(3).rule(block_rule("r", "bad", RiskLevel::High));
        for i in 0..5 {
            pipeline.admit(&Message::new(&format!("s{i}"), Some("b"), "bad"));
        }
        let log = pipeline.violations();
        assert_eq!(log.len(), 3);
        // Oldest entries were evicted.
        assert_eq!(log[0].sender, "s2");
    }

    #[test]
    fn output_transforms_run_in_priority_order() {
        let pipeline = FilterPipeline::new(10)
            .transform("suffix", 2, |c| format!("{c}!"))
            .transform("prefix", 1, |c| format!(">> {c}"));
        let verdict = pipeline.admit(&Message::new("a", Some("b"), "hello"));
        assert_eq!(verdict.message.unwrap().content, ">> hello!");
    }

    #[tokio::test]
    async fn resolve_approval_releases_held_message_once() {
        let rule = SafetyRule::new(
            "esc",
            "",
            RiskLevel::High,
            FilterAction::Escalate,
            Arc::new(KeywordClassifier::new("esc", &["transfer"])),
        );
        let pipeline = FilterPipeline::new(10).rule(rule);
        pipeline.admit(&Message::new("a", Some("b"), "transfer funds"));

        let pending = pipeline.pending_approvals();
        assert_eq!(pending.len(), 1);
        let released = pipeline.resolve_approval(&pending[0].id, true);
        assert!(released.is_some());
        // Already resolved: no second release, nothing pending.
        assert!(pipeline.resolve_approval(&pending[0].id, true).is_none());
        assert!(pipeline.pending_approvals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_escalation_lapses_after_ttl() {
        let rule = SafetyRule::new(
            "esc",
            "",
            RiskLevel::High,
            FilterAction::Escalate,
            Arc::new(KeywordClassifier::new("esc", &["transfer"])),
        );
        let pipeline = FilterPipeline::new(10)
            .rule(rule)
            .approval_ttl(Duration::from_secs(60));
        pipeline.admit(&Message::new("a", Some("b"), "transfer funds"));

        let pending = pipeline.pending_approvals();
        assert_eq!(pending.len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        // Lapsed: gone from the store and no longer resolvable.
        assert!(pipeline.pending_approvals().is_empty());
        assert!(pipeline.resolve_approval(&pending[0].id, true).is_none());
    }

    #[test]
    fn default_rules_redact_what_they_match() {
        let pipeline = FilterPipeline::with_default_rules(10);
        let verdict = pipeline.admit(&Message::new("a", Some("b"), "the api key is abc123"));
        assert_eq!(verdict.action, FilterAction::Modify);
        let forwarded = verdict.message.unwrap();
        assert_eq!(forwarded.content, "the [redacted] is abc123");
    }
}
