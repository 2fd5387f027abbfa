//! Narrative profile resolution and guardrail evaluation.
//!
//! Topic detection is deterministic keyword-set membership, not
//! inference: a topic is "detected" when the message contains the topic
//! name or one of its lexicon keywords as a case-insensitive substring.
//! The same evaluation backs live guardrailing and the offline eval
//! harness, so regression cases and production decisions cannot drift
//! apart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::agent::PolicyOverrides;
use crate::domain::profile::NarrativeProfile;

/// Topics the built-in lexicon knows how to detect even when a profile
/// does not list them, so a non-empty allow list can reject them.
const BUILTIN_TOPICS: &[&str] =
    &["Financial aid", "Mental health", "Immigration status", "Disciplinary record", "Grades"];

/// Built-in detection lexicon for institutional topics. Profiles may
/// extend per-topic keywords; the topic name itself always matches.
fn builtin_keywords(topic: &str) -> &'static [&'static str] {
    match normalize_key(topic).as_str() {
        "financial aid" => &["fafsa", "tuition assistance", "aid package", "scholarship"],
        "mental health" => &["counseling", "therapy", "crisis line"],
        "immigration status" => &["visa status", "i-20", "sevis"],
        "disciplinary record" => &["conduct case", "academic integrity violation"],
        "grades" => &["gpa", "transcript", "final grade"],
        _ => &[],
    }
}

/// The merged allow/block policy for one agent. Never persisted:
/// recomputed from profile + overrides at every evaluation so a profile
/// edit takes effect on the next call without a migration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    pub allowed_topics: Vec<String>,
    pub blocked_topics: Vec<String>,
    pub allowed_personalization_fields: Vec<String>,
    pub topic_keywords: BTreeMap<String, Vec<String>>,
    pub escalation_message: String,
}

/// Union merge of profile policy and agent-level overrides. Block
/// always wins: a topic present on both lists fails evaluation.
pub fn resolve_effective_policy(
    profile: &NarrativeProfile,
    overrides: &PolicyOverrides,
) -> EffectivePolicy {
    EffectivePolicy {
        allowed_topics: union(&profile.allowed_topics, &overrides.allowed_topics),
        blocked_topics: union(&profile.blocked_topics, &overrides.blocked_topics),
        allowed_personalization_fields: union(
            &profile.allowed_personalization_fields,
            &overrides.allowed_personalization_fields,
        ),
        topic_keywords: profile.topic_keywords.clone(),
        escalation_message: profile.escalation_message.clone(),
    }
}

fn union(base: &[String], extra: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(base.len() + extra.len());
    for value in base.iter().chain(extra) {
        let key = normalize_key(value);
        if !merged.iter().any(|existing| normalize_key(existing) == key) {
            merged.push(value.clone());
        }
    }
    merged
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardrailOutcome {
    Pass,
    Fail,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailEvaluation {
    pub outcome: GuardrailOutcome,
    pub topics_detected: Vec<String>,
    pub placeholders_detected: Vec<String>,
    pub blocked_topic_detected: bool,
    pub allowed_topics_respected: bool,
    pub personalization_allowed_only: bool,
    pub remediation: Option<String>,
}

impl EffectivePolicy {
    /// Score a candidate message against this policy. PASS only when no
    /// blocked topic is present, every detected topic is on a non-empty
    /// allow list (an empty allow list allows any non-blocked topic),
    /// and every `[placeholder]` maps to an allowed personalization
    /// field.
    pub fn evaluate(&self, message: &str) -> GuardrailEvaluation {
        let haystack = message.to_ascii_lowercase();

        // Detection universe: policy lists, profile keyword topics, and
        // the built-in lexicon. Scanning beyond the policy's own lists
        // is what lets a non-empty allow list reject off-list topics.
        let universe: Vec<String> = self
            .blocked_topics
            .iter()
            .cloned()
            .chain(self.allowed_topics.iter().cloned())
            .chain(self.topic_keywords.keys().cloned())
            .chain(BUILTIN_TOPICS.iter().map(ToString::to_string))
            .collect();

        let mut topics_detected: Vec<String> = Vec::new();
        for topic in &universe {
            if topics_detected.iter().any(|seen| normalize_key(seen) == normalize_key(topic)) {
                continue;
            }
            if self.topic_matches(topic, &haystack) {
                topics_detected.push(topic.clone());
            }
        }

        let blocked_topic_detected = topics_detected
            .iter()
            .any(|topic| contains_normalized(&self.blocked_topics, topic));

        let allowed_topics_respected = !blocked_topic_detected
            && (self.allowed_topics.is_empty()
                || topics_detected
                    .iter()
                    .all(|topic| contains_normalized(&self.allowed_topics, topic)));

        let placeholders_detected = extract_placeholders(message);
        let personalization_allowed_only = placeholders_detected.iter().all(|placeholder| {
            self.allowed_personalization_fields
                .iter()
                .any(|field| normalize_key(field).contains(&normalize_key(placeholder))
                    || normalize_key(placeholder).contains(&normalize_key(field)))
        });

        let mut failures = Vec::new();
        if blocked_topic_detected {
            failures.push("blocked topic detected");
        }
        if !allowed_topics_respected && !blocked_topic_detected {
            failures.push("topic outside allow list");
        }
        if !personalization_allowed_only {
            failures.push("personalization field not allowed");
        }

        let outcome = if failures.is_empty() { GuardrailOutcome::Pass } else { GuardrailOutcome::Fail };
        let remediation = if failures.is_empty() {
            None
        } else {
            Some(format!("guardrail checks failed: {}", failures.join("; ")))
        };

        GuardrailEvaluation {
            outcome,
            topics_detected,
            placeholders_detected,
            blocked_topic_detected,
            allowed_topics_respected,
            personalization_allowed_only,
            remediation,
        }
    }

    fn topic_matches(&self, topic: &str, haystack: &str) -> bool {
        let topic_key = normalize_key(topic);
        if haystack.contains(&topic_key) {
            return true;
        }
        let profile_keywords = self
            .topic_keywords
            .iter()
            .find(|(name, _)| normalize_key(name) == topic_key)
            .map(|(_, keywords)| keywords.as_slice())
            .unwrap_or_default();
        builtin_keywords(topic)
            .iter()
            .copied()
            .map(str::to_string)
            .chain(profile_keywords.iter().cloned())
            .any(|keyword| haystack.contains(&normalize_key(&keyword)))
    }
}

/// Bracketed field tokens, e.g. `[first_name]`.
fn extract_placeholders(message: &str) -> Vec<String> {
    let mut placeholders = Vec::new();
    let mut rest = message;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open + 1..].find(']') else { break };
        let token = rest[open + 1..open + 1 + close].trim();
        if !token.is_empty()
            && !placeholders.iter().any(|seen: &String| normalize_key(seen) == normalize_key(token))
        {
            placeholders.push(token.to_string());
        }
        rest = &rest[open + 1 + close + 1..];
    }
    placeholders
}

fn contains_normalized(values: &[String], candidate: &str) -> bool {
    let candidate = normalize_key(candidate);
    values.iter().any(|value| normalize_key(value) == candidate)
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Offline eval harness
// ---------------------------------------------------------------------------

/// Named regression case for the offline eval harness. The exact
/// evaluator that guards live runs scores these cases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCase {
    pub name: String,
    pub message: String,
    pub expected: GuardrailOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalCaseResult {
    pub name: String,
    pub expected: GuardrailOutcome,
    pub evaluation: GuardrailEvaluation,
    pub matched: bool,
}

pub fn run_eval_cases(policy: &EffectivePolicy, cases: &[EvalCase]) -> Vec<EvalCaseResult> {
    cases
        .iter()
        .map(|case| {
            let evaluation = policy.evaluate(&case.message);
            let matched = evaluation.outcome == case.expected;
            EvalCaseResult {
                name: case.name.clone(),
                expected: case.expected,
                evaluation,
                matched,
            }
        })
        .collect()
}
