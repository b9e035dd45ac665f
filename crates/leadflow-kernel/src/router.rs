//! Two-level keyword router.
//!
//! The router maps free text to labels using a tiered matching strategy:
//!
//! | Level | Technique | Typical Latency |
//! |-------|-----------|-----------------|
//! | 1 | Whole-word phrase match via [`aho_corasick`] | < 0.01 ms |
//! | 2 | Pattern match via compiled [`regex`] with named captures | < 0.1 ms |
//!
//! Text that matches neither level yields [`KeywordMatch::NoMatch`]; callers
//! decide what that means (the keyword oracle treats it as `unclear`).
//!
//! Phrases only match on word boundaries, so `"hi"` matches `"hi there"` but
//! not `"this"`.
//!
//! # Example
//!
//! ```rust
//! # use leadflow_kernel::router::{KeywordRouter, KeywordMatch};
//! let mut router = KeywordRouter::new();
//!
//! router.add_phrase("start over", "navigate:start_over");
//! router.add_pattern(
//!     r"find (?:me )?(?:some )?(?P<what>.+?) in (?P<industry>\w+)",
//!     "find_prospects",
//! ).unwrap();
//!
//! let result = router.route("ok, let's start over");
//! assert!(matches!(result, KeywordMatch::Phrase { .. }));
//! ```

use std::collections::HashMap;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The outcome of routing a piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeywordMatch {
    /// Level 1: a registered phrase occurs in the text as whole words.
    Phrase {
        label: String,
        matched_phrase: String,
    },

    /// Level 2: the text matched a regex pattern.  Named captures are
    /// provided as key/value pairs.
    Pattern {
        label: String,
        captures: HashMap<String, String>,
    },

    /// Nothing matched.
    NoMatch,
}

impl KeywordMatch {
    /// The label for any matching variant, `None` for [`KeywordMatch::NoMatch`].
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Phrase { label, .. } | Self::Pattern { label, .. } => Some(label),
            Self::NoMatch => None,
        }
    }
}

struct PatternRoute {
    label: String,
    compiled: Regex,
}

// ---------------------------------------------------------------------------
// KeywordRouter
// ---------------------------------------------------------------------------

/// Tiered keyword router.
///
/// Routes are added while building; routing itself takes `&self`, so a built
/// router can be shared behind an `Arc` without locking.
pub struct KeywordRouter {
    /// Lowercased phrases and their labels, in registration order.
    phrases: Vec<(String, String)>,
    automaton: Option<AhoCorasick>,
    patterns: Vec<PatternRoute>,
}

impl KeywordRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phrases: Vec::new(),
            automaton: None,
            patterns: Vec::new(),
        }
    }

    /// Register a phrase (case-insensitive) for `label`.
    pub fn add_phrase(&mut self, phrase: impl Into<String>, label: impl Into<String>) {
        let phrase = phrase.into().to_lowercase();
        let label = label.into();
        tracing::trace!(phrase = %phrase, label = %label, "phrase route added");
        self.phrases.push((phrase, label));
        self.rebuild();
    }

    /// Register several phrases for the same label.
    pub fn add_phrases<I, S>(&mut self, phrases: I, label: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for phrase in phrases {
            self.phrases.push((phrase.into().to_lowercase(), label.to_string()));
        }
        self.rebuild();
    }

    /// Register a regex pattern for `label`.  Patterns are matched against
    /// the lowercased text, in registration order.
    pub fn add_pattern(&mut self, pattern: &str, label: impl Into<String>) -> Result<()> {
        let compiled = Regex::new(pattern).map_err(|e| KernelError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.patterns.push(PatternRoute {
            label: label.into(),
            compiled,
        });
        Ok(())
    }

    /// Route `text`: the longest whole-word phrase wins, then the first
    /// matching pattern.
    pub fn route(&self, text: &str) -> KeywordMatch {
        let lowered = text.to_lowercase();

        let best = self
            .phrase_hits(&lowered)
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));
        if let Some((index, _)) = best {
            let (phrase, label) = &self.phrases[index];
            tracing::trace!(label = %label, "phrase match");
            return KeywordMatch::Phrase {
                label: label.clone(),
                matched_phrase: phrase.clone(),
            };
        }

        self.pattern_match(&lowered).unwrap_or(KeywordMatch::NoMatch)
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    // -- Private helpers ----------------------------------------------------

    fn rebuild(&mut self) {
        let phrases: Vec<&str> = self.phrases.iter().map(|(p, _)| p.as_str()).collect();
        match AhoCorasick::new(&phrases) {
            Ok(ac) => self.automaton = Some(ac),
            Err(e) => {
                tracing::error!(error = %e, "failed to build aho-corasick automaton");
                self.automaton = None;
            }
        }
    }

    /// `(phrase index, match length)` of every whole-word occurrence.
    fn phrase_hits(&self, lowered: &str) -> Vec<(usize, usize)> {
        let Some(ac) = self.automaton.as_ref() else {
            return Vec::new();
        };
        ac.find_overlapping_iter(lowered)
            .filter(|m| on_word_boundary(lowered, m.start(), m.end()))
            .map(|m| (m.pattern().as_usize(), m.end() - m.start()))
            .collect()
    }

    fn pattern_match(&self, lowered: &str) -> Option<KeywordMatch> {
        self.patterns.iter().find_map(|route| {
            let caps = route.compiled.captures(lowered)?;
            let captures = route
                .compiled
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().trim().to_string()))
                })
                .collect();
            Some(KeywordMatch::Pattern {
                label: route.label.clone(),
                captures,
            })
        })
    }
}

impl Default for KeywordRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    !is_word(before) && !is_word(after)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
