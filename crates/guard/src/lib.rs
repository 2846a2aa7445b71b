//! Guardrail policies — pre-flight content checks on inbound messages.
//!
//! A guardrail trip terminates the turn before any reasoning-service or
//! store call is made. The policy is injected, never hardcoded into the
//! dispatch loop.

use serde::{Deserialize, Serialize};

/// Result of checking a message against a guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardrailVerdict {
    /// Message may proceed to the reasoning service
    Allowed,
    /// Message is blocked; `term` is the denylist entry that matched
    Blocked { term: String },
}

impl GuardrailVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// A pre-flight content policy. Pure and stateless: checking a message has
/// no side effects and the same input always yields the same verdict.
pub trait Guardrail: Send + Sync {
    /// Inspect a message and return a verdict.
    fn inspect(&self, text: &str) -> GuardrailVerdict;

    /// `false` iff the message is blocked.
    fn check(&self, text: &str) -> bool {
        self.inspect(text).is_allowed()
    }
}

/// Denylist-based guardrail: blocks any message containing one of the
/// configured terms as a case-insensitive substring.
pub struct DenylistFilter {
    terms: Vec<String>,
}

impl DenylistFilter {
    /// Build a filter from an explicit term list. Terms are lowercased once
    /// at construction; matching is substring, case-insensitive.
    pub fn new(terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// The stock campus deployment denylist.
    pub fn default_terms() -> Vec<String> {
        [
            "hack", "bomb", "kill", "terrorist", "suicide", "murder", "drugs", "weapon", "rape",
            "abuse", "nude", "sex", "violence", "attack",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

impl Default for DenylistFilter {
    fn default() -> Self {
        Self::new(Self::default_terms())
    }
}

impl Guardrail for DenylistFilter {
    fn inspect(&self, text: &str) -> GuardrailVerdict {
        let lower = text.to_lowercase();
        for term in &self.terms {
            if lower.contains(term.as_str()) {
                return GuardrailVerdict::Blocked { term: term.clone() };
            }
        }
        GuardrailVerdict::Allowed
    }
}

/// A guardrail that allows everything. Useful for internal tooling where
/// the content policy is enforced upstream.
pub struct AllowAll;

impl Guardrail for AllowAll {
    fn inspect(&self, _text: &str) -> GuardrailVerdict {
        GuardrailVerdict::Allowed
    }
}
