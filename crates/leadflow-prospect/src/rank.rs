//! Deterministic ranking of scored candidates.

use std::cmp::Ordering;

use crate::candidate::ScoredCandidate;

/// Sort by `total_score` desc, then `company_score` desc, then input order.
///
/// The sort is stable, so equal candidates keep their merge order and the
/// same input always yields the same ranking.
pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(compare);
    candidates
}

fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| b.company_score.total_cmp(&a.company_score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, CompanyInfo, ScoreSource};

    fn scored(name: &str, company: f64, total: f64) -> ScoredCandidate {
        ScoredCandidate::new(
            Candidate::new(name, "", CompanyInfo::default()),
            company,
            0.5,
            total,
            "",
            ScoreSource::Fallback,
        )
    }

    fn names(ranked: &[ScoredCandidate]) -> Vec<&str> {
        ranked.iter().map(|s| s.candidate.name.as_str()).collect()
    }

    #[test]
    fn orders_by_total_then_company_then_input() {
        let ranked = rank(vec![
            scored("a", 0.2, 0.5),
            scored("b", 0.9, 0.5),
            scored("c", 0.1, 0.9),
            scored("d", 0.2, 0.5),
        ]);
        assert_eq!(names(&ranked), vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn ranking_is_repeatable() {
        let input: Vec<ScoredCandidate> = (0..20)
            .map(|i| scored(&format!("n{i}"), f64::from(i % 3) / 3.0, f64::from(i % 4) / 4.0))
            .collect();
        let first = rank(input.clone());
        for _ in 0..5 {
            assert_eq!(names(&rank(input.clone())), names(&first));
        }
    }
}
