//! Safety classification of red-flag screening output
//!
//! [`classify`] is a pure keyword classifier. Matching is case-insensitive
//! and checks the most severe level first, so a text mentioning both
//! "KRITISK" and "moderat" is critical.
//!
//! Text that matches no keyword is classified LOW and treatable. A failed
//! screening call yields UNKNOWN, also treatable. Both defaults favour
//! availability over caution and should be reviewed clinically before
//! changing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of safety screening
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Screening result unavailable
    Unknown,
    /// No red flags identified
    Low,
    /// Treat with caution
    Moderate,
    /// Urgent assessment needed
    High,
    /// Immediate referral; treatment must not proceed
    Critical,
}

impl RiskLevel {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Whether treatment may proceed at this level
    #[must_use]
    pub fn can_treat(&self) -> bool {
        !matches!(self, Self::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords per level, most severe first
const KEYWORDS: &[(RiskLevel, &[&str])] = &[
    (RiskLevel::Critical, &["kritisk", "critical"]),
    (RiskLevel::High, &["høy", "high"]),
    (RiskLevel::Moderate, &["moderat", "moderate"]),
];

const BULLETS: &[char] = &['-', '*', '•'];

/// Parsed safety screening
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAssessment {
    /// Risk level
    pub risk_level: RiskLevel,
    /// Whether treatment may proceed
    pub can_treat: bool,
    /// Screening text as returned by the backend
    pub raw_text: String,
    /// Individual red flags listed in the text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl SafetyAssessment {
    /// Assessment used when the screening call itself failed
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            risk_level: RiskLevel::Unknown,
            can_treat: true,
            raw_text: String::new(),
            flags: Vec::new(),
        }
    }

    /// Whether the pipeline must stop here
    #[must_use]
    pub fn requires_halt(&self) -> bool {
        self.risk_level == RiskLevel::Critical
    }

    /// First non-empty line of the screening text
    #[must_use]
    pub fn summary(&self) -> &str {
        self.raw_text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Classify screening text
#[must_use]
pub fn classify(text: &str) -> SafetyAssessment {
    let lower = text.to_lowercase();

    let risk_level = KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map_or(RiskLevel::Low, |(level, _)| *level);

    SafetyAssessment {
        risk_level,
        can_treat: risk_level.can_treat(),
        raw_text: text.to_string(),
        flags: extract_flags(text),
    }
}

fn extract_flags(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(BULLETS))
        .map(|flag| flag.trim().to_string())
        .filter(|flag| !flag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_any_case() {
        for text in [
            "KRITISK: cauda equina syndrom",
            "kritisk funn",
            "Risk level: Critical",
            "CRITICAL - refer now",
        ] {
            let a = classify(text);
            assert_eq!(a.risk_level, RiskLevel::Critical, "{text}");
            assert!(!a.can_treat);
            assert!(a.requires_halt());
        }
    }

    #[test]
    fn test_levels() {
        assert_eq!(classify("HØY risiko").risk_level, RiskLevel::High);
        assert_eq!(classify("High risk").risk_level, RiskLevel::High);
        assert_eq!(classify("MODERAT").risk_level, RiskLevel::Moderate);
        assert_eq!(classify("moderate concern").risk_level, RiskLevel::Moderate);
        assert!(classify("HØY risiko").can_treat);
    }

    #[test]
    fn test_unrecognised_text_is_low_and_treatable() {
        let a = classify("Ingen røde flagg funnet.");
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.can_treat);
        assert!(a.flags.is_empty());
    }

    #[test]
    fn test_most_severe_keyword_wins() {
        let a = classify("MODERAT smerte, men KRITISK nevrologisk utfall");
        assert_eq!(a.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_bullet_lines_become_flags() {
        let a = classify("HØY\n- Vekttap siste 3 mnd\n* Nattsmerter\n• Tidligere cancer\n-   \nFritekst");
        assert_eq!(
            a.flags,
            vec!["Vekttap siste 3 mnd", "Nattsmerter", "Tidligere cancer"]
        );
        assert_eq!(a.summary(), "HØY");
    }

    #[test]
    fn test_unknown_is_treatable() {
        let a = SafetyAssessment::unknown();
        assert_eq!(a.risk_level, RiskLevel::Unknown);
        assert!(a.can_treat);
        assert!(!a.requires_halt());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(classify("KRITISK")).unwrap();
        assert_eq!(json["riskLevel"], "CRITICAL");
        assert_eq!(json["canTreat"], false);
    }
}
