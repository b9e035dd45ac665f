//! Rule-based analysis of attached sources.
//!
//! Links and documents the user attaches are mined for facts that help build
//! the profile: the industries a site talks about, the roles it addresses and
//! any headcount it mentions.  Only the URL itself plus whatever description
//! or extracted text travels with the attachment are read; nothing is
//! fetched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::profile::SIZE_RE;

const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Fintech", &["fintech", "payments", "banking", "lending", "insurtech"]),
    ("Healthcare", &["healthcare", "health", "clinic", "clinics", "hospital", "medical", "patients"]),
    ("B2B SaaS", &["saas", "software"]),
    ("Retail", &["retail", "ecommerce", "e-commerce", "retailers"]),
    ("Logistics", &["logistics", "shipping", "freight", "fleet"]),
    ("Education", &["education", "edtech", "schools", "universities"]),
    ("Manufacturing", &["manufacturing", "factory", "factories", "industrial"]),
    ("Real estate", &["proptech", "real-estate", "realestate"]),
    ("Marketing", &["marketing", "advertising", "adtech"]),
];

static ROLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?P<role>ceo|cto|cfo|coo|cmo|cro|founders?|(?:vp|head) of (?:sales|engineering|marketing|product|growth|operations|finance))\b",
    )
    .ok()
});

/// One attachment as handed to `analyze_source`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInput {
    #[serde(default)]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Text already extracted from the page or document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// What was learned from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFinding {
    pub url: String,
    /// Derived from the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
}

impl SourceFinding {
    fn is_empty(&self) -> bool {
        self.industries.is_empty() && self.roles.is_empty() && self.company_size.is_none()
    }
}

/// Findings for every analyzed source and the business facts they suggest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAnalysis {
    pub findings: Vec<SourceFinding>,
    /// Suggested facts keyed like the conversation's business context
    /// (`industry`, `target_roles`, `company_size`).
    pub facts: BTreeMap<String, String>,
    /// Sources that were not web links.
    pub skipped: usize,
}

/// Analyze every web link in `sources`.
pub fn analyze_sources(sources: &[SourceInput]) -> SourceAnalysis {
    let mut analysis = SourceAnalysis::default();
    let mut industries: Vec<String> = Vec::new();
    let mut roles: Vec<String> = Vec::new();
    let mut size: Option<String> = None;

    for source in sources {
        let url = source.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            analysis.skipped += 1;
            continue;
        }
        let finding = analyze_one(source);
        push_unique(&mut industries, &finding.industries);
        push_unique(&mut roles, &finding.roles);
        if size.is_none() {
            size = finding.company_size.clone();
        }
        if finding.is_empty() {
            tracing::debug!(url, "source yielded no facts");
        }
        analysis.findings.push(finding);
    }

    if !industries.is_empty() {
        analysis.facts.insert("industry".into(), industries.join(", "));
    }
    if !roles.is_empty() {
        analysis.facts.insert("target_roles".into(), roles.join(", "));
    }
    if let Some(size) = size {
        analysis.facts.insert("company_size".into(), size);
    }

    tracing::info!(
        analyzed = analysis.findings.len(),
        skipped = analysis.skipped,
        facts = analysis.facts.len(),
        "sources analyzed"
    );
    analysis
}

fn analyze_one(source: &SourceInput) -> SourceFinding {
    let (host, path) = split_url(&source.url);
    let text = [
        path.replace(['/', '-', '_', '.'], " "),
        source.description.clone(),
        source.content.clone().unwrap_or_default(),
    ]
    .join(" ");
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .collect();

    let industries = INDUSTRY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map(|(industry, _)| (*industry).to_string())
        .collect();

    let mut roles: Vec<String> = Vec::new();
    if let Some(re) = ROLE_RE.as_ref() {
        let found: Vec<String> = re
            .captures_iter(&text)
            .map(|caps| normalize_role(&caps["role"]))
            .collect();
        push_unique(&mut roles, &found);
    }

    let company_size = SIZE_RE
        .as_ref()
        .and_then(|re| re.captures(&text))
        .map(|caps| caps["range"].trim().to_string());

    SourceFinding {
        url: source.url.trim().to_string(),
        organization: organization(host),
        industries,
        roles,
        company_size,
    }
}

fn split_url(url: &str) -> (&str, &str) {
    let rest = url
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    match rest.find(['/', '?', '#']) {
        Some(at) => (&rest[..at], &rest[at..]),
        None => (rest, ""),
    }
}

/// `"www.ledgerly.io"` -> `"Ledgerly"`.
fn organization(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let host = host.strip_prefix("www.").unwrap_or(host);
    let label = host.split('.').next().filter(|l| !l.is_empty())?;
    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

fn normalize_role(role: &str) -> String {
    let lowered = role.to_lowercase();
    match lowered.as_str() {
        "founder" | "founders" => "Founder".to_string(),
        short if short.len() <= 3 => short.to_uppercase(),
        long => long
            .split(' ')
            .map(|word| match word {
                "of" => "of".to_string(),
                "vp" => "VP".to_string(),
                other => {
                    let mut chars = other.chars();
                    chars
                        .next()
                        .map(|c| c.to_uppercase().chain(chars).collect())
                        .unwrap_or_default()
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn push_unique(list: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !list.iter().any(|have| have.eq_ignore_ascii_case(item)) {
            list.push(item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str, description: &str) -> SourceInput {
        SourceInput {
            kind: "link".into(),
            url: url.into(),
            description: description.into(),
            content: None,
        }
    }

    #[test]
    fn industries_roles_and_size_are_found() {
        let mut source = link("https://www.ledgerly.io/solutions/payments", "");
        source.content = Some(
            "Ledgerly helps finance teams at banks with 200-1000 employees. Built for the CFO and the VP of Finance."
                .into(),
        );
        let analysis = analyze_sources(&[source]);

        let finding = &analysis.findings[0];
        assert_eq!(finding.organization.as_deref(), Some("Ledgerly"));
        assert_eq!(finding.industries, vec!["Fintech"]);
        assert_eq!(finding.roles, vec!["CFO", "VP of Finance"]);
        assert_eq!(finding.company_size.as_deref(), Some("200-1000"));

        assert_eq!(analysis.facts["industry"], "Fintech");
        assert_eq!(analysis.facts["target_roles"], "CFO, VP of Finance");
        assert_eq!(analysis.facts["company_size"], "200-1000");
    }

    #[test]
    fn facts_are_merged_across_sources() {
        let analysis = analyze_sources(&[
            link("https://carewell.com/clinics", "scheduling software for clinics"),
            link("https://example.org/blog", "Why every CTO needs SaaS metrics"),
            link("file:///deck.pdf", "pitch deck"),
        ]);

        assert_eq!(analysis.findings.len(), 2);
        assert_eq!(analysis.skipped, 1);
        assert_eq!(analysis.facts["industry"], "Healthcare, B2B SaaS");
        assert_eq!(analysis.facts["target_roles"], "CTO");
        assert!(!analysis.facts.contains_key("company_size"));
    }

    #[test]
    fn bare_links_still_name_the_organization() {
        let analysis = analyze_sources(&[link("http://acme.dev", "")]);
        assert_eq!(analysis.findings[0].organization.as_deref(), Some("Acme"));
        assert!(analysis.facts.is_empty());
    }
}
