//! Review feedback on individual candidates.
//!
//! When the user reacts to a result list ("more like Ann Lee, not Bob Diaz")
//! the next search is re-ranked against those examples: every candidate that
//! resembles a liked one gains a little score, every candidate that resembles
//! a disliked one loses a little.  Disliked candidates themselves are dropped.
//!
//! Resemblance is counted per example on three traits:
//!
//! | trait            | weight |
//! |------------------|--------|
//! | same industry    | 0.05   |
//! | shared title word| 0.05   |
//! | same size bucket | 0.03   |
//!
//! Boost and penalty are each capped at [`MAX_ADJUSTMENT`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, ScoredCandidate, clamp_score};

const INDUSTRY_MATCH: f64 = 0.05;
const TITLE_MATCH: f64 = 0.05;
const SIZE_MATCH: f64 = 0.03;

/// Upper bound on the boost, and separately on the penalty.
pub const MAX_ADJUSTMENT: f64 = 0.2;

const NEGATIVE_MARKERS: &[&str] = &[
    "not ", "no ", "don't", "dont", "dislike", "less like", "fewer like", "drop ", "without ",
    "bad", "wrong", "skip ",
];

const POSITIVE_MARKERS: &[&str] = &[
    "like", "love", "more of", "good", "great", "perfect", "similar to", "keep ",
];

/// Candidates the user liked and disliked in the previous result list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectFeedback {
    #[serde(default)]
    pub liked: Vec<Candidate>,
    #[serde(default)]
    pub disliked: Vec<Candidate>,
}

impl ProspectFeedback {
    pub fn is_empty(&self) -> bool {
        self.liked.is_empty() && self.disliked.is_empty()
    }

    /// Find the reviewed candidates a message talks about.
    ///
    /// The message is split into clauses; a candidate named in a clause with
    /// a negative marker is disliked, one named in a clause with a positive
    /// marker is liked.  Names are matched case-insensitively on the full
    /// name.
    pub fn from_review(message: &str, reviewed: &[ScoredCandidate]) -> Self {
        let mut feedback = Self::default();
        let mut seen = BTreeSet::new();

        for clause in message
            .split(['.', ',', ';', '\n'])
            .flat_map(|c| c.split(" but "))
            .map(|c| format!("{} ", c.trim().to_lowercase()))
            .filter(|c| !c.trim().is_empty())
        {
            let negative = NEGATIVE_MARKERS.iter().any(|m| clause.contains(m));
            let positive = !negative && POSITIVE_MARKERS.iter().any(|m| clause.contains(m));
            if !negative && !positive {
                continue;
            }

            for scored in reviewed {
                let name = scored.candidate.name.trim().to_lowercase();
                if name.is_empty() || !clause.contains(&name) {
                    continue;
                }
                if !seen.insert(scored.candidate.identity_key()) {
                    continue;
                }
                let bucket = if negative {
                    &mut feedback.disliked
                } else {
                    &mut feedback.liked
                };
                bucket.push(scored.candidate.clone());
            }
        }

        feedback
    }

    /// Score change for `candidate`: boost from liked examples minus penalty
    /// from disliked ones.
    pub fn adjustment(&self, candidate: &Candidate) -> f64 {
        similarity(candidate, &self.liked) - similarity(candidate, &self.disliked)
    }

    /// Adjust total scores, dropping the disliked candidates themselves.
    ///
    /// Order is preserved; re-rank afterwards.
    pub fn apply(&self, scored: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        if self.is_empty() {
            return scored;
        }
        let rejected: BTreeSet<String> = self.disliked.iter().map(Candidate::identity_key).collect();

        scored
            .into_iter()
            .filter(|s| !rejected.contains(&s.candidate.identity_key()))
            .map(|mut s| {
                let delta = self.adjustment(&s.candidate);
                if delta != 0.0 {
                    s.total_score = clamp_score(s.total_score + delta);
                    let note = format!("feedback {delta:+.2}");
                    s.rationale = if s.rationale.is_empty() {
                        note
                    } else {
                        format!("{}; {note}", s.rationale)
                    };
                }
                s
            })
            .collect()
    }
}

/// Capped resemblance of `candidate` to a set of examples.
fn similarity(candidate: &Candidate, examples: &[Candidate]) -> f64 {
    let title = title_words(&candidate.title);
    let mut total = 0.0;
    for example in examples {
        if same_text(&candidate.company.industry, &example.company.industry) {
            total += INDUSTRY_MATCH;
        }
        if !title.is_disjoint(&title_words(&example.title)) {
            total += TITLE_MATCH;
        }
        if let (Some(a), Some(b)) = (
            candidate.company.employee_range(),
            example.company.employee_range(),
        ) && a == b
        {
            total += SIZE_MATCH;
        }
    }
    total.min(MAX_ADJUSTMENT)
}

fn same_text(a: &Option<String>, b: &Option<String>) -> bool {
    match (a.as_deref(), b.as_deref()) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

fn title_words(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !matches!(*w, "of" | "and" | "the"))
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CompanyInfo, ScoreSource};

    fn person(name: &str, title: &str, industry: &str, employees: u32) -> Candidate {
        let mut company = CompanyInfo::named(format!("{name} Co"));
        company.industry = Some(industry.into());
        company.employee_count = Some(employees);
        Candidate::new(name, title, company)
    }

    fn scored(candidate: Candidate, total: f64) -> ScoredCandidate {
        ScoredCandidate::new(candidate, 0.5, 0.5, total, "rule", ScoreSource::Fallback)
    }

    #[test]
    fn review_message_splits_liked_and_disliked() {
        let reviewed = vec![
            scored(person("Ann Lee", "CTO", "Fintech", 120), 0.7),
            scored(person("Bob Diaz", "VP Sales", "Retail", 40), 0.6),
            scored(person("Cy Park", "CEO", "Fintech", 300), 0.5),
        ];
        let feedback = ProspectFeedback::from_review("More like Ann Lee, not Bob Diaz", &reviewed);

        assert_eq!(feedback.liked.len(), 1);
        assert_eq!(feedback.liked[0].name, "Ann Lee");
        assert_eq!(feedback.disliked.len(), 1);
        assert_eq!(feedback.disliked[0].name, "Bob Diaz");

        let neutral = ProspectFeedback::from_review("Ann Lee works at Ledgerly", &reviewed);
        assert!(neutral.is_empty());
    }

    #[test]
    fn similar_candidates_gain_and_dissimilar_lose() {
        let feedback = ProspectFeedback {
            liked: vec![person("Ann", "Chief Technology Officer", "Fintech", 120)],
            disliked: vec![person("Bob", "Sales Manager", "Retail", 40)],
        };

        let twin = person("Dee", "Technology Lead", "fintech", 150);
        assert!((feedback.adjustment(&twin) - 0.13).abs() < 1e-9);

        let opposite = person("Eve", "Sales Director", "Retail", 45);
        assert!((feedback.adjustment(&opposite) + 0.13).abs() < 1e-9);

        let unrelated = person("Fay", "Nurse", "Healthcare", 5000);
        assert_eq!(feedback.adjustment(&unrelated), 0.0);
    }

    #[test]
    fn adjustment_is_capped() {
        let liked: Vec<Candidate> = (0..5)
            .map(|i| person(&format!("L{i}"), "CTO", "Fintech", 100))
            .collect();
        let feedback = ProspectFeedback {
            liked,
            disliked: Vec::new(),
        };
        let candidate = person("X", "CTO", "Fintech", 100);
        assert_eq!(feedback.adjustment(&candidate), MAX_ADJUSTMENT);
    }

    #[test]
    fn apply_drops_disliked_and_clamps() {
        let bob = person("Bob", "VP Sales", "Retail", 40);
        let feedback = ProspectFeedback {
            liked: vec![person("Ann", "CTO", "Fintech", 120)],
            disliked: vec![bob.clone()],
        };
        let out = feedback.apply(vec![
            scored(person("Dee", "CTO", "Fintech", 150), 0.95),
            scored(bob, 0.9),
        ]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate.name, "Dee");
        assert_eq!(out[0].total_score, 1.0);
        assert!(out[0].rationale.contains("feedback +0.13"));
    }
}
